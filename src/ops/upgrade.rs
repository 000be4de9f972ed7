//! Firmware-upgrade controller.
//!
//! Same guarded single-instance shape as magnetic alignment: idempotent
//! start, worker on its own thread, cooperative abort, outcomes through
//! the event sink. The flashing protocol itself (bootloader entry, block
//! writes, verification) is device-specific and lives behind the
//! [`FirmwareFlasher`] collaborator; this controller owns the lifecycle
//! around it — including stopping any user data log before the device
//! goes away for reflashing.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use log::{info, warn};

use crate::events::DriverEvent;
use crate::ops::{Claim, OpGuard, OpKind, OpTicket, StartOutcome};
use crate::ports::{EventSink, LogControl};

// ---------------------------------------------------------------------------
// Flasher collaborator
// ---------------------------------------------------------------------------

/// Hooks the flasher uses to cooperate with the controller: abort checks
/// between writes, progress reporting as the image goes down.
pub trait FlashMonitor {
    fn aborted(&self) -> bool;
    fn progress(&self, written: u32, total: u32);
}

/// Drives the device-specific flashing protocol.
pub trait FirmwareFlasher: Send + Sync {
    /// Flash `image`, checking `monitor.aborted()` between writes and
    /// reporting progress. Returns [`FlashError::Aborted`] when it
    /// observed the abort request.
    fn flash(&self, image: &[u8], monitor: &dyn FlashMonitor) -> Result<(), FlashError>;
}

/// Errors from [`FirmwareFlasher`] implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    /// The controller requested abort and the flasher stopped.
    Aborted,
    /// The device rejected a flashing step.
    Device(String),
    /// The image is malformed or unusable.
    Image(String),
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted => write!(f, "flashing aborted"),
            Self::Device(msg) => write!(f, "device rejected flashing step: {msg}"),
            Self::Image(msg) => write!(f, "firmware image unusable: {msg}"),
        }
    }
}

/// Flasher that accepts any image without touching a device. Useful when
/// wiring the driver up before a real bootloader protocol exists, and in
/// tests.
pub struct NullFlasher;

impl FirmwareFlasher for NullFlasher {
    fn flash(&self, image: &[u8], monitor: &dyn FlashMonitor) -> Result<(), FlashError> {
        let total = image.len() as u32;
        monitor.progress(total, total);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Workflow status for the upgrade operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradePhase {
    Idle,
    Flashing,
    Complete,
    Error,
    Aborted,
}

struct UpgradeState {
    phase: UpgradePhase,
    started_at: Option<Instant>,
}

/// Controller for the firmware-upgrade long operation.
pub struct FirmwareUpgrader {
    guard: Arc<OpGuard>,
    sink: Arc<dyn EventSink>,
    logger: Arc<dyn LogControl>,
    flasher: Arc<dyn FirmwareFlasher>,
    state: Arc<Mutex<UpgradeState>>,
    abort: Arc<AtomicBool>,
}

impl FirmwareUpgrader {
    pub fn new(
        guard: Arc<OpGuard>,
        sink: Arc<dyn EventSink>,
        logger: Arc<dyn LogControl>,
        flasher: Arc<dyn FirmwareFlasher>,
    ) -> Self {
        Self {
            guard,
            sink,
            logger,
            flasher,
            state: Arc::new(Mutex::new(UpgradeState {
                phase: UpgradePhase::Idle,
                started_at: None,
            })),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Launch the upgrade workflow on its own thread.
    ///
    /// Idempotent for the upgrade kind; busy while alignment holds the
    /// guard. Stops the user data log before flashing begins.
    pub fn start(&self, image: Vec<u8>) -> StartOutcome {
        let ticket = match self.guard.claim(OpKind::FirmwareUpgrade) {
            Claim::AlreadyRunning => return StartOutcome::AlreadyRunning,
            Claim::Busy(other) => return StartOutcome::Busy(other),
            Claim::Started(ticket) => ticket,
        };

        self.abort.store(false, Ordering::SeqCst);
        self.logger.stop_user_log();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.phase = UpgradePhase::Flashing;
            state.started_at = Some(Instant::now());
        }

        let flasher = Arc::clone(&self.flasher);
        let sink = Arc::clone(&self.sink);
        let state = Arc::clone(&self.state);
        let abort = Arc::clone(&self.abort);

        let spawned = thread::Builder::new().name("fw-upgrade".into()).spawn(move || {
            Self::worker(ticket, &image, flasher.as_ref(), sink.as_ref(), &state, &abort);
        });

        match spawned {
            Ok(_) => {
                info!("firmware upgrade worker started");
                StartOutcome::Launched
            }
            Err(e) => {
                warn!("firmware upgrade worker spawn failed: {e}");
                Self::set_phase(&self.state, UpgradePhase::Error);
                StartOutcome::SpawnFailed(e.to_string())
            }
        }
    }

    /// Request cooperative abort; the flasher observes it between writes.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
        info!("firmware upgrade abort requested");
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running(OpKind::FirmwareUpgrade)
    }

    pub fn phase(&self) -> UpgradePhase {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase
    }

    /// When the current (or last) upgrade was launched.
    pub fn started_at(&self) -> Option<Instant> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .started_at
    }

    // ── Worker ────────────────────────────────────────────────

    fn worker(
        ticket: OpTicket,
        image: &[u8],
        flasher: &dyn FirmwareFlasher,
        sink: &dyn EventSink,
        state: &Mutex<UpgradeState>,
        abort: &AtomicBool,
    ) {
        struct Monitor<'a> {
            abort: &'a AtomicBool,
            sink: &'a dyn EventSink,
        }
        impl FlashMonitor for Monitor<'_> {
            fn aborted(&self) -> bool {
                self.abort.load(Ordering::SeqCst)
            }
            fn progress(&self, written: u32, total: u32) {
                self.sink
                    .publish(&DriverEvent::UpgradeProgress { written, total });
            }
        }

        let result = flasher.flash(image, &Monitor { abort, sink });

        // Record the final phase, release the guard, then publish — once
        // the operation stops reading as running its status is final, and
        // the event is only observable after both.
        match result {
            Ok(()) => {
                Self::set_phase(state, UpgradePhase::Complete);
                drop(ticket);
                info!("firmware upgrade complete ({} bytes)", image.len());
                sink.publish(&DriverEvent::UpgradeComplete);
            }
            Err(FlashError::Aborted) => {
                Self::set_phase(state, UpgradePhase::Aborted);
                drop(ticket);
                info!("firmware upgrade aborted");
            }
            Err(e) => {
                Self::set_phase(state, UpgradePhase::Error);
                drop(ticket);
                warn!("firmware upgrade failed: {e}");
                sink.publish(&DriverEvent::UpgradeFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn set_phase(state: &Mutex<UpgradeState>, phase: UpgradePhase) {
        state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::NullLogControl;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Sink that records events for assertions.
    struct CollectSink(Mutex<Vec<DriverEvent>>);
    impl CollectSink {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }
        fn events(&self) -> Vec<DriverEvent> {
            self.0.lock().unwrap().clone()
        }
    }
    impl EventSink for CollectSink {
        fn publish(&self, event: &DriverEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct CountingLog(AtomicUsize);
    impl LogControl for CountingLog {
        fn stop_user_log(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached within 1s");
    }

    #[test]
    fn happy_path_publishes_progress_then_complete() {
        let sink = CollectSink::new();
        let up = FirmwareUpgrader::new(
            Arc::new(OpGuard::new()),
            sink.clone(),
            Arc::new(NullLogControl),
            Arc::new(NullFlasher),
        );

        assert_eq!(up.start(vec![0xAA; 128]), StartOutcome::Launched);
        wait_until(|| !up.is_running());

        assert_eq!(up.phase(), UpgradePhase::Complete);
        assert!(up.started_at().is_some());
        let events = sink.events();
        assert_eq!(
            events.first(),
            Some(&DriverEvent::UpgradeProgress {
                written: 128,
                total: 128
            })
        );
        assert_eq!(events.last(), Some(&DriverEvent::UpgradeComplete));
    }

    #[test]
    fn stop_user_log_runs_before_flashing() {
        let log = Arc::new(CountingLog(AtomicUsize::new(0)));
        let up = FirmwareUpgrader::new(
            Arc::new(OpGuard::new()),
            Arc::new(crate::ports::NullSink),
            log.clone(),
            Arc::new(NullFlasher),
        );

        assert!(up.start(vec![1, 2, 3]).accepted());
        wait_until(|| !up.is_running());
        assert_eq!(log.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abort_observed_by_flasher_ends_without_completion_event() {
        /// Flasher that spins until it sees the abort request.
        struct WaitForAbort;
        impl FirmwareFlasher for WaitForAbort {
            fn flash(&self, _image: &[u8], monitor: &dyn FlashMonitor) -> Result<(), FlashError> {
                for _ in 0..200 {
                    if monitor.aborted() {
                        return Err(FlashError::Aborted);
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }
        }

        let sink = CollectSink::new();
        let up = FirmwareUpgrader::new(
            Arc::new(OpGuard::new()),
            sink.clone(),
            Arc::new(NullLogControl),
            Arc::new(WaitForAbort),
        );

        assert!(up.start(vec![0u8; 16]).accepted());
        up.abort();
        wait_until(|| !up.is_running());

        assert_eq!(up.phase(), UpgradePhase::Aborted);
        assert!(sink.events().is_empty(), "no event after abort");
    }

    #[test]
    fn failed_flash_publishes_error_event() {
        struct BadImage;
        impl FirmwareFlasher for BadImage {
            fn flash(&self, _image: &[u8], _monitor: &dyn FlashMonitor) -> Result<(), FlashError> {
                Err(FlashError::Image("truncated header".into()))
            }
        }

        let sink = CollectSink::new();
        let up = FirmwareUpgrader::new(
            Arc::new(OpGuard::new()),
            sink.clone(),
            Arc::new(NullLogControl),
            Arc::new(BadImage),
        );

        assert!(up.start(vec![0u8; 4]).accepted());
        wait_until(|| !up.is_running());

        assert_eq!(up.phase(), UpgradePhase::Error);
        match sink.events().as_slice() {
            [DriverEvent::UpgradeFailed { reason }] => {
                assert!(reason.contains("truncated header"));
            }
            other => panic!("expected one failure event, got {other:?}"),
        }
    }
}
