//! Port traits — the boundary between the driver core and its collaborators.
//!
//! ```text
//!   dispatch ──▶ ImuDriver ──▶ FrameCodec ──▶ Transport ──▶ device
//!                    ▲                                        │
//!                    └── ReplySink ◀── receive-path parser ◀──┘
//!                    └──▶ EventSink / LogControl / PropertySource
//! ```
//!
//! Frame construction, reply parsing, identification-text parsing and
//! properties retrieval are all collaborator concerns: the driver consumes
//! these traits and never touches wire bytes or the filesystem itself.

use core::fmt;

use crate::config::DeviceProperties;
use crate::events::DriverEvent;
use crate::protocol::{CommandArgs, Opcode};

// ───────────────────────────────────────────────────────────────
// Frame codec (driver → wire bytes)
// ───────────────────────────────────────────────────────────────

/// Everything the codec may need besides the opcode and arguments.
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    /// Cached device configuration; required to encode parameter ids.
    pub properties: Option<&'a DeviceProperties>,
}

/// Builds one wire command frame from an opcode and arguments.
pub trait FrameCodec: Send + Sync {
    fn encode(
        &self,
        opcode: Opcode,
        ctx: EncodeContext<'_>,
        args: &CommandArgs,
    ) -> Result<Vec<u8>, CodecError>;
}

/// Errors from [`FrameCodec`] implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Encoding a parameter write requires the properties document.
    MissingProperties,
    /// The parameter id has no definition in the properties document.
    UnknownParameter(u32),
    /// The codec does not support this opcode/argument combination.
    Unsupported(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProperties => write!(f, "device properties not loaded"),
            Self::UnknownParameter(id) => write!(f, "unknown parameter id {id}"),
            Self::Unsupported(what) => write!(f, "unsupported command shape: {what}"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink (driver → presentation)
// ───────────────────────────────────────────────────────────────

/// Fire-and-forget notification channel for background-workflow results.
///
/// Called from worker threads; implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &DriverEvent);
}

/// Sink that drops every event. Useful when no presentation layer is
/// attached.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &DriverEvent) {}
}

// ───────────────────────────────────────────────────────────────
// Logging collaborator (upgrade precondition)
// ───────────────────────────────────────────────────────────────

/// Best-effort hook to stop any user-facing data log before a firmware
/// upgrade takes the device away.
pub trait LogControl: Send + Sync {
    fn stop_user_log(&self);
}

/// No-op log control for deployments without a logging layer.
pub struct NullLogControl;

impl LogControl for NullLogControl {
    fn stop_user_log(&self) {}
}

// ───────────────────────────────────────────────────────────────
// Properties retrieval (config-file collaborator)
// ───────────────────────────────────────────────────────────────

/// Loads the device-properties document for a given application name.
/// On-disk caching and network retrieval live behind this trait.
pub trait PropertySource {
    fn load(&self, app_name: &str) -> Result<DeviceProperties, PropertyError>;
}

/// Errors from [`PropertySource`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    /// No document exists for this application name.
    NotFound,
    /// The document exists but failed to parse.
    Corrupted(String),
    /// Retrieval failed (filesystem or network).
    Io(String),
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "properties document not found"),
            Self::Corrupted(msg) => write!(f, "properties document corrupted: {msg}"),
            Self::Io(msg) => write!(f, "properties retrieval failed: {msg}"),
        }
    }
}
