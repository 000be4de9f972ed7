//! Long-running device-side operations.
//!
//! Magnetic alignment and firmware upgrade are multi-step procedures the
//! device executes over many command round trips. Each runs on its own
//! worker thread so the launching caller returns immediately; outcomes
//! travel through the [`EventSink`](crate::ports::EventSink) port.
//!
//! Both kinds poll the same operation reply channel, so a single shared
//! [`OpGuard`] serialises them: at most one long operation of any kind is
//! active at a time. Re-starting the kind that is already active is an
//! idempotent success; starting the other kind reports busy.

pub mod mag_align;
pub mod upgrade;

use core::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

/// The two long-operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    MagAlign,
    FirmwareUpgrade,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MagAlign => write!(f, "magnetic alignment"),
            Self::FirmwareUpgrade => write!(f, "firmware upgrade"),
        }
    }
}

/// Result of asking the guard for permission to launch a worker.
pub enum Claim {
    /// Guard claimed; the ticket releases it on drop.
    Started(OpTicket),
    /// The same kind is already active — treat as idempotent success.
    AlreadyRunning,
    /// A different kind holds the guard.
    Busy(OpKind),
}

/// Outcome of a long-operation start request, as seen by dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A fresh worker thread was launched.
    Launched,
    /// The same operation was already active; no second worker.
    AlreadyRunning,
    /// A different long operation is active.
    Busy(OpKind),
    /// The worker thread could not be spawned.
    SpawnFailed(String),
}

impl StartOutcome {
    /// Whether the request counts as success (launched or idempotent).
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Launched | Self::AlreadyRunning)
    }
}

/// Mutual-exclusion guard over all long operations.
///
/// The guard is the single authority on "is a long operation running";
/// controllers derive their running state from it rather than keeping
/// their own boolean.
#[derive(Default)]
pub struct OpGuard {
    active: Mutex<Option<OpKind>>,
}

impl OpGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim the guard for `kind`.
    pub fn claim(self: &Arc<Self>, kind: OpKind) -> Claim {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match *active {
            Some(current) if current == kind => Claim::AlreadyRunning,
            Some(current) => Claim::Busy(current),
            None => {
                *active = Some(kind);
                debug!("op guard claimed: {kind}");
                Claim::Started(OpTicket {
                    guard: Arc::clone(self),
                    kind,
                })
            }
        }
    }

    /// The currently active operation, if any.
    pub fn active(&self) -> Option<OpKind> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `kind` specifically is the active operation.
    pub fn is_running(&self, kind: OpKind) -> bool {
        self.active() == Some(kind)
    }
}

/// RAII release of the guard. Held by the worker thread for the lifetime
/// of the workflow — every exit path (success, failure, abort, panic)
/// releases the guard when the ticket drops.
pub struct OpTicket {
    guard: Arc<OpGuard>,
    kind: OpKind,
}

impl Drop for OpTicket {
    fn drop(&mut self) {
        let mut active = self
            .guard
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active = None;
        debug!("op guard released: {}", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_then_release_on_drop() {
        let guard = Arc::new(OpGuard::new());
        assert_eq!(guard.active(), None);

        let ticket = match guard.claim(OpKind::MagAlign) {
            Claim::Started(t) => t,
            _ => panic!("fresh guard must grant the claim"),
        };
        assert!(guard.is_running(OpKind::MagAlign));

        drop(ticket);
        assert_eq!(guard.active(), None);
    }

    #[test]
    fn same_kind_reclaim_is_idempotent() {
        let guard = Arc::new(OpGuard::new());
        let _ticket = match guard.claim(OpKind::MagAlign) {
            Claim::Started(t) => t,
            _ => panic!(),
        };
        assert!(matches!(
            guard.claim(OpKind::MagAlign),
            Claim::AlreadyRunning
        ));
    }

    #[test]
    fn cross_kind_claim_reports_busy() {
        let guard = Arc::new(OpGuard::new());
        let _ticket = match guard.claim(OpKind::FirmwareUpgrade) {
            Claim::Started(t) => t,
            _ => panic!(),
        };
        match guard.claim(OpKind::MagAlign) {
            Claim::Busy(OpKind::FirmwareUpgrade) => {}
            _ => panic!("expected busy with the upgrade kind"),
        }
    }

    #[test]
    fn guard_releases_even_if_the_holder_panics() {
        let guard = Arc::new(OpGuard::new());
        let inner = Arc::clone(&guard);

        let result = std::thread::spawn(move || {
            let _ticket = match inner.claim(OpKind::MagAlign) {
                Claim::Started(t) => t,
                _ => panic!("claim failed"),
            };
            panic!("worker blew up");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(guard.active(), None);
    }

    #[test]
    fn start_outcome_accept_matrix() {
        assert!(StartOutcome::Launched.accepted());
        assert!(StartOutcome::AlreadyRunning.accepted());
        assert!(!StartOutcome::Busy(OpKind::MagAlign).accepted());
        assert!(!StartOutcome::SpawnFailed("no threads".into()).accepted());
    }
}
