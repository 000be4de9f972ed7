//! Magnetic-alignment controller.
//!
//! Drives the device's `ma` sub-command family as a background workflow:
//!
//! ```text
//! Idle ─▶ Starting ─▶ Aligning ─▶ Finalizing ─▶ Complete
//!             │           │            │
//!             │           │            └────────▶ Error
//!             └───────────┴─────────────────────▶ Aborted
//! ```
//!
//! `start()` claims the shared guard, launches the worker, and returns
//! immediately; the worker's outcome is published through the event sink.
//! Abort is cooperative — the flag is observed at the top of each status
//! poll, and the in-flight round trip is always allowed to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use log::{info, warn};

use crate::decode::{CalibrationResult, decode_mag_align};
use crate::error::DriverError;
use crate::events::DriverEvent;
use crate::link::DeviceLink;
use crate::ops::{Claim, OpGuard, OpKind, OpTicket, StartOutcome};
use crate::ports::EventSink;
use crate::protocol::{CommandArgs, opcodes};

/// `ma` sub-command keywords.
const SUB_START: &str = "start";
const SUB_STATUS: &str = "status";
const SUB_STORED: &str = "stored";
const SUB_ABORT: &str = "abort";
const SUB_SAVE: &str = "save";

/// Status payload that signals the device has a result ready.
const READY: &[u8] = &[0x00];

/// Explicit workflow status. The shared guard, not this enum, is the
/// authority on whether a worker is active; the phase records how the
/// last (or current) run is progressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignPhase {
    Idle,
    Starting,
    Aligning,
    Finalizing,
    Complete,
    Error,
    Aborted,
}

struct AlignState {
    phase: AlignPhase,
    started_at: Option<Instant>,
}

/// How the worker body ended, when it did not produce a calibration.
enum WorkflowEnd {
    Aborted,
    Failed(DriverError),
}

/// Controller for the magnetic-alignment long operation.
pub struct MagAligner {
    link: Arc<DeviceLink>,
    guard: Arc<OpGuard>,
    sink: Arc<dyn EventSink>,
    state: Arc<Mutex<AlignState>>,
    abort: Arc<AtomicBool>,
}

impl MagAligner {
    pub fn new(link: Arc<DeviceLink>, guard: Arc<OpGuard>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            link,
            guard,
            sink,
            state: Arc::new(Mutex::new(AlignState {
                phase: AlignPhase::Idle,
                started_at: None,
            })),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Launch the alignment workflow on its own thread.
    ///
    /// Idempotent: a start while alignment is already running launches
    /// nothing and still counts as success. A start while a firmware
    /// upgrade holds the guard reports busy.
    pub fn start(&self) -> StartOutcome {
        let ticket = match self.guard.claim(OpKind::MagAlign) {
            Claim::AlreadyRunning => return StartOutcome::AlreadyRunning,
            Claim::Busy(other) => return StartOutcome::Busy(other),
            Claim::Started(ticket) => ticket,
        };

        self.abort.store(false, Ordering::SeqCst);
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.phase = AlignPhase::Starting;
            state.started_at = Some(Instant::now());
        }

        let link = Arc::clone(&self.link);
        let state = Arc::clone(&self.state);
        let abort = Arc::clone(&self.abort);
        let sink = Arc::clone(&self.sink);

        let spawned = thread::Builder::new()
            .name("mag-align".into())
            .spawn(move || Self::worker(ticket, &link, &state, &abort, sink.as_ref()));

        match spawned {
            Ok(_) => {
                info!("mag align worker started");
                StartOutcome::Launched
            }
            Err(e) => {
                // The ticket died with the failed spawn; the guard is free.
                warn!("mag align worker spawn failed: {e}");
                Self::set_phase(&self.state, AlignPhase::Error);
                StartOutcome::SpawnFailed(e.to_string())
            }
        }
    }

    /// Request abort and tell the device. The worker observes the flag at
    /// its next poll iteration; success is reported unless the device
    /// answers the abort sub-command with an error (or not at all).
    pub fn abort(&self) -> Result<(), DriverError> {
        self.abort.store(true, Ordering::SeqCst);
        info!("mag align abort requested");

        let res = self.link.operation(
            opcodes::MAG_ALIGN,
            &CommandArgs::SubCommand(SUB_ABORT),
            self.link.config().command_timeout(),
        )?;
        if res.error {
            return Err(DriverError::Device(res.payload.to_json().to_string()));
        }
        Ok(())
    }

    /// Persist the device's stored alignment result. Valid whether or not
    /// a workflow is running; the verdict is solely the device's reply.
    pub fn save(&self) -> Result<(), DriverError> {
        let res = self.link.operation(
            opcodes::MAG_ALIGN,
            &CommandArgs::SubCommand(SUB_SAVE),
            self.link.config().command_timeout(),
        )?;
        if res.error {
            return Err(DriverError::Device(res.payload.to_json().to_string()));
        }
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.guard.is_running(OpKind::MagAlign)
    }

    pub fn phase(&self) -> AlignPhase {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase
    }

    /// When the current (or last) workflow was launched.
    pub fn started_at(&self) -> Option<Instant> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .started_at
    }

    // ── Worker ────────────────────────────────────────────────

    fn worker(
        ticket: OpTicket,
        link: &DeviceLink,
        state: &Mutex<AlignState>,
        abort: &AtomicBool,
        sink: &dyn EventSink,
    ) {
        let outcome = Self::run_workflow(link, state, abort);

        // Record the final phase, release the guard, then publish — the
        // completion event is only observable once the operation no
        // longer reads as running.
        match outcome {
            Ok(cal) => {
                Self::set_phase(state, AlignPhase::Complete);
                drop(ticket);
                info!("mag align complete");
                sink.publish(&DriverEvent::AlignmentComplete(cal));
            }
            Err(WorkflowEnd::Aborted) => {
                Self::set_phase(state, AlignPhase::Aborted);
                drop(ticket);
                info!("mag align aborted");
            }
            Err(WorkflowEnd::Failed(e)) => {
                Self::set_phase(state, AlignPhase::Error);
                drop(ticket);
                warn!("mag align failed: {e}");
                sink.publish(&DriverEvent::AlignmentFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn run_workflow(
        link: &DeviceLink,
        state: &Mutex<AlignState>,
        abort: &AtomicBool,
    ) -> Result<CalibrationResult, WorkflowEnd> {
        let cfg = link.config();
        let fail = WorkflowEnd::Failed;

        // Kick the device off. Only the eventual status matters — the
        // immediate ack (or its timeout) carries no information.
        let _ = link
            .operation(
                opcodes::MAG_ALIGN,
                &CommandArgs::SubCommand(SUB_START),
                cfg.align_start_timeout(),
            )
            .map_err(|e| fail(e.into()))?;

        thread::sleep(cfg.align_settle());
        Self::set_phase(state, AlignPhase::Aligning);

        let mut polls: u32 = 0;
        loop {
            if abort.load(Ordering::SeqCst) {
                return Err(WorkflowEnd::Aborted);
            }

            let status = link
                .operation(
                    opcodes::MAG_ALIGN,
                    &CommandArgs::SubCommand(SUB_STATUS),
                    cfg.align_status_timeout(),
                )
                .map_err(|e| fail(e.into()))?;
            if status.payload.as_bytes() == Some(READY) {
                break;
            }

            polls += 1;
            if let Some(limit) = cfg.align_status_poll_limit {
                if polls >= limit {
                    return Err(fail(DriverError::Stalled { polls }));
                }
            }
            thread::sleep(cfg.align_poll_backoff());
        }

        // The abort ack can satisfy a status wait (same opcode, same
        // ready byte), so re-check the flag before fetching the result.
        if abort.load(Ordering::SeqCst) {
            return Err(WorkflowEnd::Aborted);
        }

        Self::set_phase(state, AlignPhase::Finalizing);
        let stored = link
            .operation(
                opcodes::MAG_ALIGN,
                &CommandArgs::SubCommand(SUB_STORED),
                cfg.align_stored_timeout(),
            )
            .map_err(|e| fail(e.into()))?;
        if stored.error {
            return Err(fail(DriverError::Device(
                stored.payload.to_json().to_string(),
            )));
        }

        let bytes = stored
            .payload
            .as_bytes()
            .ok_or_else(|| fail(DriverError::Device("calibration payload missing".into())))?;
        decode_mag_align(bytes).map_err(|e| fail(e.into()))
    }

    fn set_phase(state: &Mutex<AlignState>, phase: AlignPhase) {
        state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase = phase;
    }
}
