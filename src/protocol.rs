//! Wire-facing protocol types shared across the driver.
//!
//! The device speaks a command set of two-letter opcodes; every command
//! produces exactly one asynchronous reply. Frame construction and reply
//! parsing happen in external collaborators — this module only defines the
//! vocabulary the driver and those collaborators exchange.

use core::fmt;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Opcode
// ---------------------------------------------------------------------------

/// Fixed two-character command identifier, e.g. `gA` or `ma`.
///
/// Identity is by exact bytes; distinct opcodes are never confused.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode([u8; 2]);

impl Opcode {
    pub const fn new(raw: [u8; 2]) -> Self {
        Self(raw)
    }

    /// Raw opcode bytes as they appear on the wire.
    pub const fn as_bytes(&self) -> [u8; 2] {
        self.0
    }

    /// ASCII rendering for logs and error payloads.
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opcode({})", self.as_str())
    }
}

/// Opcodes understood by the device.
pub mod opcodes {
    use super::Opcode;

    /// Device identification string.
    pub const PING: Opcode = Opcode::new(*b"pG");
    /// Application version string.
    pub const APP_VERSION: Opcode = Opcode::new(*b"gV");
    /// Read all user parameters.
    pub const GET_PARAMS: Opcode = Opcode::new(*b"gA");
    /// Write one user parameter.
    pub const UPDATE_PARAM: Opcode = Opcode::new(*b"uP");
    /// Persist the current configuration to device flash.
    pub const SAVE_CONFIG: Opcode = Opcode::new(*b"sC");
    /// Magnetic-alignment sub-command carrier.
    pub const MAG_ALIGN: Opcode = Opcode::new(*b"ma");
}

// ---------------------------------------------------------------------------
// Reply channel
// ---------------------------------------------------------------------------

/// Logical reply channel. The device multiplexes all replies over one
/// opcode namespace; callers distinguish by workflow so that a
/// long-operation status poll never consumes a reply meant for an ordinary
/// command, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ReplyChannel {
    /// Immediate request/response commands (`gA`, `uP`, `sC`, …).
    Command = 0,
    /// Long-operation sub-commands and status polls (`ma`, upgrade).
    Operation = 1,
}

impl ReplyChannel {
    /// Number of channels — sizes the mailbox slot array.
    pub const COUNT: usize = 2;

    pub const fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// Payload and reply
// ---------------------------------------------------------------------------

/// Reply payload as produced by the external receive-path parser.
///
/// The parser decides the representation: raw bytes for binary status
/// payloads, decoded JSON values for parameter reads, text for
/// identification strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Bytes(Vec<u8>),
    Values(Value),
    Text(String),
}

impl Payload {
    /// Borrow the raw bytes, if this payload carries any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the decoded value, if this payload carries one.
    pub fn as_values(&self) -> Option<&Value> {
        match self {
            Self::Values(v) => Some(v),
            _ => None,
        }
    }

    /// Render the payload as JSON for response data and event payloads.
    /// Bytes become a lowercase hex string, matching how the device's
    /// binary fields are conventionally displayed.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Bytes(b) => {
                let mut s = String::with_capacity(b.len() * 2);
                for byte in b {
                    use core::fmt::Write;
                    let _ = write!(s, "{byte:02x}");
                }
                Value::String(s)
            }
            Self::Values(v) => v.clone(),
            Self::Text(t) => Value::String(t.clone()),
        }
    }
}

/// One in-flight reply, produced exactly once per issued command and
/// consumed by a correlator wait (or discarded on timeout).
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub opcode: Opcode,
    pub payload: Payload,
    /// Device-reported error flag, verbatim from the wire parser.
    pub error: bool,
}

// ---------------------------------------------------------------------------
// Command arguments
// ---------------------------------------------------------------------------

/// Arguments handed to the frame codec alongside the opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandArgs {
    /// Bare command, no body (`gA`, `sC`, `pG`, `gV`).
    None,
    /// Parameter write: id + new value (`uP`).
    SetParam { id: u32, value: Value },
    /// Long-operation sub-command keyword (`ma`: "start", "status",
    /// "stored", "abort", "save").
    SubCommand(&'static str),
}
