//! Unified error types for the driver.
//!
//! A single `DriverError` enum that every subsystem converts into, keeping
//! error handling uniform at the surface. Command timeouts and
//! device-reported failures are *not* errors at the type level — the
//! correlator returns those as values so presentation code has one failure
//! shape to handle; `DriverError` covers everything else (collaborator
//! faults, decode failures, configuration problems).

use core::fmt;

use crate::link::transport::TransportError;
use crate::ports::{CodecError, PropertyError};

// ---------------------------------------------------------------------------
// Top-level driver error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Frame encoding or transport write failed.
    Link(LinkError),
    /// A calibration payload could not be decoded.
    Decode(DecodeError),
    /// The device properties document could not be obtained.
    Property(PropertyError),
    /// Driver configuration failed validation.
    Config(&'static str),
    /// The device answered a workflow step with its error flag set;
    /// carries the failure payload verbatim.
    Device(String),
    /// A long operation polled for status past its configured limit
    /// without the device signalling readiness.
    Stalled { polls: u32 },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Property(e) => write!(f, "properties: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Device(data) => write!(f, "device error: {data}"),
            Self::Stalled { polls } => {
                write!(f, "no readiness after {polls} status polls")
            }
        }
    }
}

impl std::error::Error for DriverError {}

// ---------------------------------------------------------------------------
// Link errors (encode + transmit path)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LinkError {
    /// The codec collaborator could not build a frame.
    Encode(CodecError),
    /// The transport collaborator rejected the write.
    Transport(TransportError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "encode: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
        }
    }
}

impl From<CodecError> for LinkError {
    fn from(e: CodecError) -> Self {
        Self::Encode(e)
    }
}

impl From<TransportError> for LinkError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Decode errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The stored-calibration payload is shorter than the fixed field
    /// layout requires.
    ShortPayload { expected: usize, got: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortPayload { expected, got } => {
                write!(f, "calibration payload too short: {got} bytes, need {expected}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions into the top-level error
// ---------------------------------------------------------------------------

impl From<LinkError> for DriverError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<DecodeError> for DriverError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<PropertyError> for DriverError {
    fn from(e: PropertyError) -> Self {
        Self::Property(e)
    }
}

/// Driver-wide `Result` alias.
pub type Result<T> = core::result::Result<T, DriverError>;
