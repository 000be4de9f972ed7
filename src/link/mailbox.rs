//! Single-slot reply mailbox.
//!
//! The rendezvous point between the external receive path and a waiting
//! correlator. One slot per [`ReplyChannel`]; delivery overwrites
//! (last-write-wins — the caller serialises its own requests, so at most
//! one reply per channel is ever outstanding), retrieval atomically reads
//! *and clears* the slot so a stale reply can never satisfy a later,
//! unrelated wait.
//!
//! Waiting is condition-variable based with an explicit deadline — the
//! waiter sleeps until delivery or deadline, it never spins.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Instant;

use log::debug;

use crate::protocol::{Opcode, Reply, ReplyChannel};

/// Why a [`ReplyMailbox::take`] call came back empty-handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// No reply landed before the deadline.
    TimedOut,
    /// A reply landed but for a different opcode. The slot has been
    /// cleared; the reply is discarded, not retried.
    Mismatch { expected: Opcode, got: Opcode },
}

#[derive(Default)]
struct Slot {
    reply: Mutex<Option<Reply>>,
    available: Condvar,
}

/// Two-channel reply mailbox shared between the receive path and the
/// correlator.
#[derive(Default)]
pub struct ReplyMailbox {
    slots: [Slot; ReplyChannel::COUNT],
}

impl ReplyMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a reply from the receive path. Unconditionally overwrites
    /// the slot and wakes the waiter, if any.
    pub fn deliver(&self, channel: ReplyChannel, reply: Reply) {
        let slot = &self.slots[channel.index()];
        let mut guard = slot.reply.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = guard.replace(reply) {
            debug!("mailbox: overwrote unconsumed {} reply on {channel:?}", old.opcode);
        }
        slot.available.notify_one();
    }

    /// Block until the slot is non-empty or `deadline` passes, then read
    /// and clear it. The slot is cleared exactly once per call that
    /// observed a reply, whether or not the opcode matched.
    pub fn take(
        &self,
        channel: ReplyChannel,
        expected: Opcode,
        deadline: Instant,
    ) -> Result<Reply, WaitError> {
        let slot = &self.slots[channel.index()];
        let mut guard = slot.reply.lock().unwrap_or_else(PoisonError::into_inner);

        while guard.is_none() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (g, _) = slot
                .available
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = g;
        }

        match guard.take() {
            Some(reply) if reply.opcode == expected => Ok(reply),
            Some(reply) => Err(WaitError::Mismatch {
                expected,
                got: reply.opcode,
            }),
            None => Err(WaitError::TimedOut),
        }
    }

    /// Drop any reply sitting in the slot. The correlator purges before
    /// transmitting so a reply that raced in after an earlier deadline
    /// cannot satisfy the next wait.
    pub fn purge(&self, channel: ReplyChannel) {
        let slot = &self.slots[channel.index()];
        let mut guard = slot.reply.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stale) = guard.take() {
            debug!("mailbox: purged stale {} reply on {channel:?}", stale.opcode);
        }
    }
}
