//! Driver configuration.
//!
//! Two documents live here: `DriverConfig`, the host-side tunables
//! (deadlines and poll pacing for every command class), and
//! `DeviceProperties`, the slice of the device's JSON configuration
//! document the driver needs — parameter definitions for encoding and the
//! application name the document was fetched for.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host-side driver tunables.
///
/// Defaults mirror the deadlines the device family is known to meet:
/// parameter reads are the slowest round trip, alignment start the most
/// generous, and everything else answers within a second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    // --- Ordinary commands ---
    /// Deadline for single-shot commands (`uP`, `sC`, `ma abort/save`), ms.
    pub command_timeout_ms: u64,
    /// Deadline for the full-parameter read (`gA`), ms.
    pub param_read_timeout_ms: u64,

    // --- Magnetic alignment ---
    /// Deadline for the alignment start sub-command, ms.
    pub align_start_timeout_ms: u64,
    /// Deadline for one alignment status poll, ms.
    pub align_status_timeout_ms: u64,
    /// Deadline for fetching the stored calibration payload, ms.
    pub align_stored_timeout_ms: u64,
    /// Settle delay between the start sub-command and the first status
    /// poll, ms.
    pub align_settle_ms: u64,
    /// Backoff between status polls, ms.
    pub align_poll_backoff_ms: u64,
    /// Maximum number of status polls before the workflow gives up.
    /// `None` restores the unbounded behaviour (poll until the device
    /// signals readiness or the operation is aborted).
    pub align_status_poll_limit: Option<u32>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            // Ordinary commands
            command_timeout_ms: 1_000,
            param_read_timeout_ms: 2_000,

            // Alignment
            align_start_timeout_ms: 3_000,
            align_status_timeout_ms: 1_000,
            align_stored_timeout_ms: 2_000,
            align_settle_ms: 1_000,
            align_poll_backoff_ms: 500,
            align_status_poll_limit: Some(600), // ~5 min at the default backoff
        }
    }
}

impl DriverConfig {
    /// Reject configurations that would hang or spin the driver.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.command_timeout_ms == 0
            || self.param_read_timeout_ms == 0
            || self.align_start_timeout_ms == 0
            || self.align_status_timeout_ms == 0
            || self.align_stored_timeout_ms == 0
        {
            return Err("command deadlines must be non-zero");
        }
        if self.align_poll_backoff_ms == 0 {
            return Err("alignment poll backoff must be non-zero");
        }
        if self.align_status_poll_limit == Some(0) {
            return Err("alignment poll limit must be non-zero when set");
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn param_read_timeout(&self) -> Duration {
        Duration::from_millis(self.param_read_timeout_ms)
    }

    pub fn align_start_timeout(&self) -> Duration {
        Duration::from_millis(self.align_start_timeout_ms)
    }

    pub fn align_status_timeout(&self) -> Duration {
        Duration::from_millis(self.align_status_timeout_ms)
    }

    pub fn align_stored_timeout(&self) -> Duration {
        Duration::from_millis(self.align_stored_timeout_ms)
    }

    pub fn align_settle(&self) -> Duration {
        Duration::from_millis(self.align_settle_ms)
    }

    pub fn align_poll_backoff(&self) -> Duration {
        Duration::from_millis(self.align_poll_backoff_ms)
    }
}

// ---------------------------------------------------------------------------
// Device properties
// ---------------------------------------------------------------------------

/// One user-parameter definition from the device's configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDefinition {
    #[serde(rename = "paramId")]
    pub param_id: u32,
    pub name: String,
    /// Wire type tag ("uint64", "int64", "double", "char8", …).
    #[serde(rename = "type")]
    pub value_type: String,
}

/// The slice of the device's JSON configuration document the driver
/// consumes. Retrieval and on-disk caching of the full document is a
/// collaborator concern (`PropertySource`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Application the document describes (e.g. "IMU", "VG_AHRS").
    #[serde(rename = "appName", default)]
    pub app_name: String,
    /// User-parameter table, indexed on demand by id.
    #[serde(rename = "userConfiguration", default)]
    pub user_configuration: Vec<ParamDefinition>,
}

impl DeviceProperties {
    /// Look up a parameter definition by id.
    pub fn parameter(&self, id: u32) -> Option<&ParamDefinition> {
        self.user_configuration.iter().find(|p| p.param_id == id)
    }

    /// Full document as JSON, for the `get_config` surface.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
