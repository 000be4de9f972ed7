//! Command correlator.
//!
//! Turns the device's asynchronous, single-channel reply delivery into
//! synchronous-looking request/response calls with deadlines: encode,
//! transmit, block on the mailbox, fold every disappointment into the one
//! canonical timeout shape.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::LinkError;
use crate::link::mailbox::{ReplyMailbox, WaitError};
use crate::link::transport::Transport;
use crate::ports::{EncodeContext, FrameCodec};
use crate::protocol::{CommandArgs, Opcode, Payload, ReplyChannel};

/// Payload text of the synthetic failure produced when no matching reply
/// arrives in time.
pub const TIMEOUT_TEXT: &str = "Command timeout";

/// Outcome of one command round trip.
///
/// Timeouts and device-reported failures share this shape on purpose:
/// presentation code handles exactly one failure form. Collaborator
/// faults (encode, transport) are the only `Err` path out of
/// [`Correlator::send_and_wait`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub payload: Payload,
    pub error: bool,
}

impl CommandResult {
    /// The synthetic timeout result.
    pub fn timeout() -> Self {
        Self {
            payload: Payload::Text(TIMEOUT_TEXT.into()),
            error: true,
        }
    }

    /// Whether this is the synthetic timeout rather than a device reply.
    pub fn is_timeout(&self) -> bool {
        matches!(&self.payload, Payload::Text(t) if t == TIMEOUT_TEXT)
    }

    /// Numeric device code, for replies that carry one (`uP` acks).
    pub fn code(&self) -> Option<i64> {
        self.payload.as_values().and_then(serde_json::Value::as_i64)
    }
}

/// Issues commands and correlates their replies under a deadline.
pub struct Correlator {
    transport: Mutex<Box<dyn Transport>>,
    codec: Box<dyn FrameCodec>,
    mailbox: Arc<ReplyMailbox>,
}

impl Correlator {
    pub fn new(transport: Box<dyn Transport>, codec: Box<dyn FrameCodec>) -> Self {
        Self {
            transport: Mutex::new(transport),
            codec,
            mailbox: Arc::new(ReplyMailbox::new()),
        }
    }

    /// Shared mailbox handle, for building the receive-path sink.
    pub fn mailbox(&self) -> Arc<ReplyMailbox> {
        Arc::clone(&self.mailbox)
    }

    /// Issue `opcode` with `args` and block until a matching reply lands
    /// on `channel` or `timeout` elapses.
    ///
    /// Guarantees the channel slot is empty on return, and purges it
    /// before transmitting so a reply that raced in after an earlier
    /// deadline cannot satisfy this wait.
    pub fn send_and_wait(
        &self,
        channel: ReplyChannel,
        opcode: Opcode,
        ctx: EncodeContext<'_>,
        args: &CommandArgs,
        timeout: Duration,
    ) -> Result<CommandResult, LinkError> {
        let frame = self.codec.encode(opcode, ctx, args)?;

        self.mailbox.purge(channel);
        {
            let mut transport = self
                .transport
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            transport.write(&frame)?;
        }

        let deadline = Instant::now() + timeout;
        match self.mailbox.take(channel, opcode, deadline) {
            Ok(reply) => Ok(CommandResult {
                payload: reply.payload,
                error: reply.error,
            }),
            Err(WaitError::TimedOut) => {
                debug!("{opcode}: no reply within {timeout:?}");
                Ok(CommandResult::timeout())
            }
            Err(WaitError::Mismatch { expected, got }) => {
                warn!("{expected}: discarded mismatched reply {got}");
                Ok(CommandResult::timeout())
            }
        }
    }
}
