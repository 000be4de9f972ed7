//! Transport abstraction — any byte-oriented channel to the device.
//!
//! Concrete implementations live outside the driver core:
//! - UART serial (USB-serial adapter on the host)
//! - TCP bridge to a remote serial server
//! - In-process simulator (see [`crate::sim`])
//!
//! The driver only ever writes command frames; the matching read half is
//! owned by the external receive path, which parses reply frames and feeds
//! them back through [`ReplySink`](crate::link::ReplySink).

use core::fmt;

/// Write-only byte transport.
pub trait Transport: Send {
    /// Transmit one complete command frame. Fire-and-forget: delivery
    /// confirmation only ever arrives as a reply frame.
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Error from a [`Transport`] write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A transport that discards all writes. Useful as a default when no
/// device is connected, and in tests that exercise timeout paths.
pub struct NullTransport;

impl Transport for NullTransport {
    fn write(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
}
