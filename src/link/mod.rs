//! Command/reply link.
//!
//! ```text
//! ┌──────────┐ encode ┌───────────┐ write ┌───────────┐
//! │ caller    │──────▶│ Correlator │──────▶│ Transport │──▶ device
//! └──────────┘        │           │       └───────────┘
//!       ▲             │  take()   │
//!       │             └─────┬─────┘
//!       │ CommandResult     │ deadline wait
//!       │             ┌─────▼─────┐ deliver ┌──────────────┐
//!       └─────────────│  Mailbox  │◀────────│  ReplySink    │◀── receive path
//!                     └───────────┘         └──────────────┘
//! ```
//!
//! The mailbox is the only shared mutable state crossing threads; the
//! correlator blocks its caller for at most the requested deadline.

pub mod correlator;
pub mod mailbox;
pub mod transport;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::config::{DeviceProperties, DriverConfig};
use crate::error::LinkError;
use crate::ports::{EncodeContext, FrameCodec};
use crate::protocol::{CommandArgs, Opcode, Payload, Reply, ReplyChannel};
use correlator::{CommandResult, Correlator};
use mailbox::ReplyMailbox;
use transport::Transport;

/// Handle given to the external receive path — the sole producer feeding
/// the mailbox. Cloneable; each parsed reply frame is pushed through one
/// of the two channel-specific methods.
#[derive(Clone)]
pub struct ReplySink {
    mailbox: Arc<ReplyMailbox>,
}

impl ReplySink {
    pub(crate) fn new(mailbox: Arc<ReplyMailbox>) -> Self {
        Self { mailbox }
    }

    /// Reply to an immediate command (`gA`, `uP`, `sC`, …).
    pub fn command_reply(&self, opcode: Opcode, payload: Payload, error: bool) {
        self.mailbox.deliver(
            ReplyChannel::Command,
            Reply {
                opcode,
                payload,
                error,
            },
        );
    }

    /// Reply to a long-operation sub-command or status poll.
    pub fn operation_reply(&self, opcode: Opcode, payload: Payload, error: bool) {
        self.mailbox.deliver(
            ReplyChannel::Operation,
            Reply {
                opcode,
                payload,
                error,
            },
        );
    }
}

// ---------------------------------------------------------------------------
// Device link
// ---------------------------------------------------------------------------

/// The shared half of the driver: correlator, timing configuration, and
/// the cached device-properties document the codec needs for encoding.
///
/// Wrapped in an `Arc` and cloned into every long-operation worker, so
/// background workflows issue round trips through exactly the same path
/// as foreground commands.
pub struct DeviceLink {
    correlator: Correlator,
    config: DriverConfig,
    properties: RwLock<Option<DeviceProperties>>,
}

impl DeviceLink {
    pub fn new(
        transport: Box<dyn Transport>,
        codec: Box<dyn FrameCodec>,
        config: DriverConfig,
    ) -> Self {
        Self {
            correlator: Correlator::new(transport, codec),
            config,
            properties: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Replace the cached properties document.
    pub fn set_properties(&self, props: DeviceProperties) {
        *self
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(props);
    }

    /// Snapshot of the cached properties document, if loaded.
    pub fn properties(&self) -> Option<DeviceProperties> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The handle the external receive path delivers replies through.
    pub fn reply_sink(&self) -> ReplySink {
        ReplySink::new(self.correlator.mailbox())
    }

    /// One round trip on the immediate-command channel.
    pub fn command(
        &self,
        opcode: Opcode,
        args: &CommandArgs,
        timeout: Duration,
    ) -> Result<CommandResult, LinkError> {
        self.round_trip(ReplyChannel::Command, opcode, args, timeout)
    }

    /// One round trip on the long-operation channel.
    pub fn operation(
        &self,
        opcode: Opcode,
        args: &CommandArgs,
        timeout: Duration,
    ) -> Result<CommandResult, LinkError> {
        self.round_trip(ReplyChannel::Operation, opcode, args, timeout)
    }

    fn round_trip(
        &self,
        channel: ReplyChannel,
        opcode: Opcode,
        args: &CommandArgs,
        timeout: Duration,
    ) -> Result<CommandResult, LinkError> {
        // Snapshot the properties so no lock is held across the round trip.
        let props = self.properties();
        let ctx = EncodeContext {
            properties: props.as_ref(),
        };
        self.correlator
            .send_and_wait(channel, opcode, ctx, args, timeout)
    }
}
