//! Outbound driver events.
//!
//! Long operations run on their own threads, so their outcomes cannot be
//! returned to the caller that launched them — they are published through
//! the [`EventSink`](crate::ports::EventSink) port instead. Sinks that
//! bridge to a streaming presentation layer can forward the wire-facing
//! `(category, kind, data)` triple.

use serde_json::{Value, json};

use crate::decode::CalibrationResult;

/// Asynchronous lifecycle events emitted by the driver's background
/// workflows.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Magnetic alignment finished; carries the decoded calibration.
    AlignmentComplete(CalibrationResult),
    /// Magnetic alignment failed (transport, device, or decode fault).
    AlignmentFailed { reason: String },
    /// Firmware upgrade wrote another slice of the image.
    UpgradeProgress { written: u32, total: u32 },
    /// Firmware upgrade finished and the image was accepted.
    UpgradeComplete,
    /// Firmware upgrade failed.
    UpgradeFailed { reason: String },
}

impl DriverEvent {
    /// Stream category, constant for all driver events.
    pub fn category(&self) -> &'static str {
        "stream"
    }

    /// Event kind within the stream category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlignmentComplete(_) | Self::AlignmentFailed { .. } => "mag_status",
            Self::UpgradeProgress { .. } | Self::UpgradeComplete | Self::UpgradeFailed { .. } => {
                "upgrade_status"
            }
        }
    }

    /// Event payload in the wire-facing shape.
    pub fn data(&self) -> Value {
        match self {
            Self::AlignmentComplete(cal) => json!({
                "status": "complete",
                "value": cal.to_json(),
            }),
            Self::AlignmentFailed { reason } => json!({
                "status": "error",
                "reason": reason,
            }),
            Self::UpgradeProgress { written, total } => json!({
                "status": "progress",
                "written": written,
                "total": total,
            }),
            Self::UpgradeComplete => json!({ "status": "complete" }),
            Self::UpgradeFailed { reason } => json!({
                "status": "error",
                "reason": reason,
            }),
        }
    }
}
