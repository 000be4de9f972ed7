//! The driver surface.
//!
//! [`ImuDriver`] is what external dispatch talks to: a handful of
//! synchronous commands (each one `send_and_wait` round trip, or a short
//! sequence of them) plus the entry points of the two background long
//! operations. Every surface method returns a [`Response`] — a
//! `{status, data}` pair — so the presentation layer has exactly one
//! result shape to render, whatever went wrong underneath.
//!
//! The driver also owns the caches the device protocol assumes: the
//! parsed device identity, the properties document (needed to encode
//! parameter writes), and the most recent full-parameter snapshot.

use std::sync::{Arc, PoisonError, RwLock};

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{DeviceProperties, DriverConfig};
use crate::error::{DriverError, Result};
use crate::link::transport::Transport;
use crate::link::{DeviceLink, ReplySink};
use crate::ops::mag_align::MagAligner;
use crate::ops::upgrade::{FirmwareFlasher, FirmwareUpgrader};
use crate::ops::{OpGuard, StartOutcome};
use crate::ports::{EventSink, FrameCodec, LogControl, PropertySource};
use crate::protocol::{CommandArgs, Payload, opcodes};

// ---------------------------------------------------------------------------
// Surface result shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// The `{status, data}` result every surface command returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: Status,
    pub data: Value,
}

impl Response {
    pub fn success(data: Value) -> Self {
        Self {
            status: Status::Success,
            data,
        }
    }

    pub fn error(data: Value) -> Self {
        Self {
            status: Status::Error,
            data,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

// ---------------------------------------------------------------------------
// Cached identity
// ---------------------------------------------------------------------------

/// Parsed device identification. Building this from the `pG` response
/// text is the identification collaborator's job; the driver only caches
/// the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub pn: String,
    pub firmware_version: String,
    pub sn: String,
}

/// Parsed application identification (from the `gV` response text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub app_name: String,
    pub version: String,
}

/// One parameter write request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamUpdate {
    #[serde(rename = "paramId")]
    pub param_id: u32,
    pub value: Value,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Host-side driver instance for one connected device.
pub struct ImuDriver {
    link: Arc<DeviceLink>,
    mag_align: MagAligner,
    upgrader: FirmwareUpgrader,
    identity: RwLock<Option<(DeviceInfo, AppInfo)>>,
    parameters: RwLock<Option<Value>>,
}

impl ImuDriver {
    /// Wire up a driver from its collaborators.
    pub fn new(
        transport: Box<dyn Transport>,
        codec: Box<dyn FrameCodec>,
        sink: Arc<dyn EventSink>,
        logger: Arc<dyn LogControl>,
        flasher: Arc<dyn FirmwareFlasher>,
        config: DriverConfig,
    ) -> Result<Self> {
        config.validate().map_err(DriverError::Config)?;

        let link = Arc::new(DeviceLink::new(transport, codec, config));
        let guard = Arc::new(OpGuard::new());
        let mag_align = MagAligner::new(Arc::clone(&link), Arc::clone(&guard), Arc::clone(&sink));
        let upgrader = FirmwareUpgrader::new(guard, sink, logger, flasher);

        Ok(Self {
            link,
            mag_align,
            upgrader,
            identity: RwLock::new(None),
            parameters: RwLock::new(None),
        })
    }

    /// Handle for the external receive path to deliver replies through.
    pub fn reply_sink(&self) -> ReplySink {
        self.link.reply_sink()
    }

    // ── Caches ────────────────────────────────────────────────

    /// Record the parsed device identity after a successful probe.
    pub fn attach_identity(&self, device: DeviceInfo, app: AppInfo) {
        info!("device identified: {} {} ({})", device.name, device.firmware_version, app.app_name);
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some((device, app));
    }

    pub fn identity(&self) -> Option<(DeviceInfo, AppInfo)> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch the properties document for the identified application and
    /// cache it for parameter encoding. Falls back to the generic "IMU"
    /// application when the device has not been identified.
    pub fn load_properties(&self, source: &dyn PropertySource) -> Result<()> {
        let app_name = self
            .identity()
            .map_or_else(|| "IMU".to_string(), |(_, app)| app.app_name);
        let props = source.load(&app_name)?;
        info!("properties loaded for app '{app_name}'");
        self.link.set_properties(props);
        Ok(())
    }

    /// Directly install a properties document (e.g. from a test fixture).
    pub fn set_properties(&self, props: DeviceProperties) {
        self.link.set_properties(props);
    }

    pub fn properties(&self) -> Option<DeviceProperties> {
        self.link.properties()
    }

    /// Sample rate from the cached parameter snapshot ("Packet Rate"),
    /// with the device family's default when nothing is cached.
    pub fn sample_rate(&self) -> String {
        let params = self
            .parameters
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        params
            .as_ref()
            .and_then(Value::as_array)
            .and_then(|list| list.iter().find(|p| p["name"] == "Packet Rate"))
            .map(|p| match &p["value"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "100".into())
    }

    // ── Command surface ───────────────────────────────────────

    /// Cached device identification, as name/value display rows.
    pub fn get_device_info(&self) -> Response {
        match self.identity() {
            Some((device, app)) => Response::success(json!([
                {"name": "Product Name", "value": device.name},
                {"name": "PN", "value": device.pn},
                {"name": "Firmware Version", "value": device.firmware_version},
                {"name": "SN", "value": device.sn},
                {"name": "App Version", "value": app.version},
            ])),
            None => Response::error(json!("device not identified")),
        }
    }

    /// Cached properties document.
    pub fn get_config(&self) -> Response {
        match self.properties() {
            Some(props) => Response::success(props.to_json()),
            None => Response::error(json!("properties not loaded")),
        }
    }

    /// Read all parameters from the device and cache the snapshot.
    pub fn get_params(&self) -> Response {
        let res = self.link.command(
            opcodes::GET_PARAMS,
            &CommandArgs::None,
            self.link.config().param_read_timeout(),
        );
        match res {
            Ok(r) if !r.error => match r.payload {
                Payload::Values(values) => {
                    *self
                        .parameters
                        .write()
                        .unwrap_or_else(PoisonError::into_inner) = Some(values.clone());
                    Response::success(values)
                }
                _ => Response::error(json!("No Response")),
            },
            Ok(_) => Response::error(json!("No Response")),
            Err(e) => Response::error(json!(e.to_string())),
        }
    }

    /// Write one parameter. Success carries the device's numeric ack
    /// code; a timeout or device-flagged failure carries the failure
    /// payload verbatim.
    pub fn set_param(&self, update: &ParamUpdate) -> Response {
        let res = self.link.command(
            opcodes::UPDATE_PARAM,
            &CommandArgs::SetParam {
                id: update.param_id,
                value: update.value.clone(),
            },
            self.link.config().command_timeout(),
        );
        match res {
            Ok(r) if r.error => Response::error(json!({"error": r.payload.to_json()})),
            Ok(r) => Response::success(json!({"error": r.code().unwrap_or(0)})),
            Err(e) => Response::error(json!({"error": e.to_string()})),
        }
    }

    /// Write a batch of parameters, stopping at the first failure.
    ///
    /// Writes already acknowledged stand — there is no rollback; the
    /// returned response surfaces the failing parameter's error code.
    pub fn set_params(&self, updates: &[ParamUpdate]) -> Response {
        for update in updates {
            let res = self.set_param(update);
            if !res.is_success() {
                return res;
            }
            let code = res.data["error"].as_i64().unwrap_or(0);
            if code > 0 {
                return Response::error(res.data);
            }
        }
        Response::success(json!({"error": 0}))
    }

    /// Persist the device configuration to flash.
    pub fn save_config(&self) -> Response {
        let res = self.link.command(
            opcodes::SAVE_CONFIG,
            &CommandArgs::None,
            self.link.config().command_timeout(),
        );
        match res {
            Ok(r) if r.error => Response::error(r.payload.to_json()),
            Ok(r) => Response::success(r.payload.to_json()),
            Err(e) => Response::error(json!(e.to_string())),
        }
    }

    // ── Long operations ───────────────────────────────────────

    pub fn mag_align_start(&self) -> Response {
        Self::launch_response(self.mag_align.start())
    }

    pub fn mag_align_abort(&self) -> Response {
        match self.mag_align.abort() {
            Ok(()) => Response::success(Value::Null),
            Err(_) => Response::error(json!({"error": 1})),
        }
    }

    pub fn mag_align_save(&self) -> Response {
        match self.mag_align.save() {
            Ok(()) => Response::success(Value::Null),
            Err(_) => Response::error(json!({"error": 1})),
        }
    }

    pub fn start_upgrade(&self, image: Vec<u8>) -> Response {
        Self::launch_response(self.upgrader.start(image))
    }

    /// Read access to the alignment controller (phase inspection).
    pub fn aligner(&self) -> &MagAligner {
        &self.mag_align
    }

    /// Read access to the upgrade controller (phase inspection, abort).
    pub fn upgrader(&self) -> &FirmwareUpgrader {
        &self.upgrader
    }

    /// Logging metadata block, assembled from the caches.
    pub fn log_descriptor(&self) -> Response {
        let Some((device, app)) = self.identity() else {
            return Response::error(json!("device not identified"));
        };
        let props = self.properties().map_or(Value::Null, |p| p.to_json());
        Response::success(json!({
            "type": "IMU",
            "model": device.name,
            "logInfo": {
                "pn": device.pn,
                "sn": device.sn,
                "sampleRate": self.sample_rate(),
                "appVersion": app.version,
                "imuProperties": props,
            }
        }))
    }

    fn launch_response(outcome: StartOutcome) -> Response {
        match outcome {
            StartOutcome::Launched | StartOutcome::AlreadyRunning => {
                Response::success(Value::Null)
            }
            StartOutcome::Busy(other) => {
                Response::error(json!({"error": format!("{other} in progress")}))
            }
            StartOutcome::SpawnFailed(reason) => Response::error(json!({"error": reason})),
        }
    }
}
