//! In-process device simulator.
//!
//! A scripted stand-in for a real unit: [`SimTransport`] loops command
//! frames straight into [`SimDevice`], which answers through the driver's
//! [`ReplySink`] exactly like an external receive path would. Responses
//! are identical in shape to the real hardware's, so the full driver
//! stack — correlator, mailbox, long operations — runs unmodified against
//! it. Used by the integration tests and the demo binary.
//!
//! The frame layout here ([`SimCodec`]) is deliberately minimal: preamble,
//! opcode, length, body. Checksums live below the packet boundary on the
//! real link and are out of scope for the simulated one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::warn;
use serde_json::{Value, json};

use crate::link::ReplySink;
use crate::link::transport::{Transport, TransportError};
use crate::ports::{CodecError, EncodeContext, FrameCodec};
use crate::protocol::{CommandArgs, Opcode, Payload, opcodes};

const PREAMBLE: [u8; 2] = [0x55, 0x55];

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Frame codec for the simulated link:
/// `[0x55, 0x55, opcode₀, opcode₁, len, body…]`.
pub struct SimCodec;

impl FrameCodec for SimCodec {
    fn encode(
        &self,
        opcode: Opcode,
        ctx: EncodeContext<'_>,
        args: &CommandArgs,
    ) -> Result<Vec<u8>, CodecError> {
        let body = match args {
            CommandArgs::None => Vec::new(),
            CommandArgs::SetParam { id, value } => {
                // Parameter ids are validated against the properties
                // document, as on the real link.
                let props = ctx.properties.ok_or(CodecError::MissingProperties)?;
                if props.parameter(*id).is_none() {
                    return Err(CodecError::UnknownParameter(*id));
                }
                let mut body = id.to_le_bytes().to_vec();
                body.extend(serde_json::to_vec(value).map_err(|_| {
                    CodecError::Unsupported("unserialisable parameter value")
                })?);
                body
            }
            CommandArgs::SubCommand(word) => word.as_bytes().to_vec(),
        };

        if body.len() > u8::MAX as usize {
            return Err(CodecError::Unsupported("body too long for frame"));
        }

        let mut frame = Vec::with_capacity(5 + body.len());
        frame.extend_from_slice(&PREAMBLE);
        frame.extend_from_slice(&opcode.as_bytes());
        frame.push(body.len() as u8);
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

// ---------------------------------------------------------------------------
// Scripted device
// ---------------------------------------------------------------------------

/// Behaviour script for a simulated device.
pub struct SimBehavior {
    /// Status polls answered "in progress" before readiness is signalled.
    pub status_polls_until_ready: u32,
    /// Parameter ids the device rejects, with the ack code it returns.
    pub reject_params: HashMap<u32, i64>,
    /// Opcodes the device never answers (exercises timeout paths).
    pub silent_opcodes: Vec<Opcode>,
    /// Raw calibration fields reported by `ma stored`:
    /// hard-iron X/Y, soft-iron ratio, soft-iron angle.
    pub calibration: [u16; 4],
    /// Parameter list answered to `gA`.
    pub parameters: Value,
    /// Whether `ma save` is answered with the error flag set.
    pub mag_save_error: bool,
    /// Truncate the `ma stored` payload below the decodable minimum
    /// (exercises the decode-failure path).
    pub truncate_stored: bool,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            status_polls_until_ready: 2,
            reject_params: HashMap::new(),
            silent_opcodes: Vec::new(),
            calibration: [0x0400, 0xFC00, 0xFFFF, 0x8000],
            parameters: json!([
                {"paramId": 3, "name": "Baud Rate", "value": 38400},
                {"paramId": 4, "name": "Packet Type", "value": "z1"},
                {"paramId": 5, "name": "Packet Rate", "value": 100},
            ]),
            mag_save_error: false,
            truncate_stored: false,
        }
    }
}

#[derive(Default)]
struct SimState {
    status_polls_seen: u32,
    align_active: bool,
    /// Parameter writes the device accepted, in arrival order.
    accepted_writes: Vec<(u32, Value)>,
}

/// The scripted device. Attach the driver's [`ReplySink`] after
/// construction, then hand its [`SimDevice::transport`] to the driver.
pub struct SimDevice {
    behavior: SimBehavior,
    state: Mutex<SimState>,
    sink: Mutex<Option<ReplySink>>,
}

impl SimDevice {
    pub fn new(behavior: SimBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            state: Mutex::new(SimState::default()),
            sink: Mutex::new(None),
        })
    }

    /// Connect the device's reply path to the driver's mailbox.
    pub fn attach(&self, sink: ReplySink) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    /// The loopback transport feeding this device.
    pub fn transport(self: &Arc<Self>) -> Box<dyn Transport> {
        Box::new(SimTransport {
            device: Arc::clone(self),
        })
    }

    /// Parameter writes the device has accepted so far.
    pub fn accepted_writes(&self) -> Vec<(u32, Value)> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .accepted_writes
            .clone()
    }

    // ── Frame handling ────────────────────────────────────────

    fn handle_frame(&self, frame: &[u8]) {
        if frame.len() < 5 || frame[0..2] != PREAMBLE {
            warn!("sim: dropping malformed frame ({} bytes)", frame.len());
            return;
        }
        let opcode = Opcode::new([frame[2], frame[3]]);
        let body_len = frame[4] as usize;
        let Some(body) = frame.get(5..5 + body_len) else {
            warn!("sim: frame body shorter than its declared length");
            return;
        };

        if self.behavior.silent_opcodes.contains(&opcode) {
            return;
        }

        match opcode {
            opcodes::PING => self.reply_command(
                opcode,
                Payload::Text("OpenIMU300ZI 5020-3885-01 1.1.3 SN:1808400188".into()),
                false,
            ),
            opcodes::APP_VERSION => {
                self.reply_command(opcode, Payload::Text("OpenIMU300ZI IMU 1.1.3".into()), false);
            }
            opcodes::GET_PARAMS => {
                self.reply_command(opcode, Payload::Values(self.behavior.parameters.clone()), false);
            }
            opcodes::UPDATE_PARAM => self.handle_param_write(body),
            opcodes::SAVE_CONFIG => self.reply_command(opcode, Payload::Bytes(vec![0x00]), false),
            opcodes::MAG_ALIGN => self.handle_mag_align(body),
            other => warn!("sim: unhandled opcode {other}"),
        }
    }

    fn handle_param_write(&self, body: &[u8]) {
        let Some(id_bytes) = body.get(0..4) else {
            warn!("sim: short uP body");
            return;
        };
        let id = u32::from_le_bytes([id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]]);
        let value: Value = serde_json::from_slice(&body[4..]).unwrap_or(Value::Null);

        let code = self.behavior.reject_params.get(&id).copied().unwrap_or(0);
        if code == 0 {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .accepted_writes
                .push((id, value));
        }
        self.reply_command(opcodes::UPDATE_PARAM, Payload::Values(json!(code)), false);
    }

    fn handle_mag_align(&self, body: &[u8]) {
        match core::str::from_utf8(body).unwrap_or("") {
            "start" => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.align_active = true;
                state.status_polls_seen = 0;
                drop(state);
                self.reply_operation(Payload::Bytes(vec![0x00]), false);
            }
            "status" => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                // An aborted (or never-started) alignment reads as ready.
                let ready = !state.align_active
                    || state.status_polls_seen >= self.behavior.status_polls_until_ready;
                state.status_polls_seen += 1;
                drop(state);
                let byte = if ready { 0x00 } else { 0x01 };
                self.reply_operation(Payload::Bytes(vec![byte]), false);
            }
            "stored" => {
                let mut payload = vec![0u8; 16];
                for (i, raw) in self.behavior.calibration.iter().enumerate() {
                    payload[8 + i * 2..10 + i * 2].copy_from_slice(&raw.to_be_bytes());
                }
                if self.behavior.truncate_stored {
                    payload.truncate(8);
                }
                self.reply_operation(Payload::Bytes(payload), false);
            }
            "abort" => {
                self.state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .align_active = false;
                self.reply_operation(Payload::Bytes(vec![0x00]), false);
            }
            "save" => {
                self.reply_operation(Payload::Bytes(vec![0x00]), self.behavior.mag_save_error);
            }
            other => warn!("sim: unknown ma sub-command {other:?}"),
        }
    }

    fn reply_command(&self, opcode: Opcode, payload: Payload, error: bool) {
        if let Some(sink) = &*self.sink.lock().unwrap_or_else(PoisonError::into_inner) {
            sink.command_reply(opcode, payload, error);
        }
    }

    fn reply_operation(&self, payload: Payload, error: bool) {
        if let Some(sink) = &*self.sink.lock().unwrap_or_else(PoisonError::into_inner) {
            sink.operation_reply(opcodes::MAG_ALIGN, payload, error);
        }
    }
}

/// Transport that loops frames straight into the simulated device.
pub struct SimTransport {
    device: Arc<SimDevice>,
}

impl Transport for SimTransport {
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.device.handle_frame(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceProperties, ParamDefinition};

    fn props() -> DeviceProperties {
        DeviceProperties {
            app_name: "IMU".into(),
            user_configuration: vec![ParamDefinition {
                param_id: 5,
                name: "Packet Rate".into(),
                value_type: "int64".into(),
            }],
        }
    }

    #[test]
    fn codec_frames_a_bare_command() {
        let frame = SimCodec
            .encode(
                opcodes::GET_PARAMS,
                EncodeContext { properties: None },
                &CommandArgs::None,
            )
            .unwrap();
        assert_eq!(frame, vec![0x55, 0x55, b'g', b'A', 0]);
    }

    #[test]
    fn codec_requires_properties_for_param_writes() {
        let err = SimCodec
            .encode(
                opcodes::UPDATE_PARAM,
                EncodeContext { properties: None },
                &CommandArgs::SetParam {
                    id: 5,
                    value: json!(200),
                },
            )
            .unwrap_err();
        assert_eq!(err, CodecError::MissingProperties);
    }

    #[test]
    fn codec_rejects_undefined_parameter_ids() {
        let p = props();
        let err = SimCodec
            .encode(
                opcodes::UPDATE_PARAM,
                EncodeContext {
                    properties: Some(&p),
                },
                &CommandArgs::SetParam {
                    id: 99,
                    value: json!(1),
                },
            )
            .unwrap_err();
        assert_eq!(err, CodecError::UnknownParameter(99));
    }

    #[test]
    fn subcommand_body_is_the_keyword_bytes() {
        let frame = SimCodec
            .encode(
                opcodes::MAG_ALIGN,
                EncodeContext { properties: None },
                &CommandArgs::SubCommand("status"),
            )
            .unwrap();
        assert_eq!(&frame[..5], &[0x55, 0x55, b'm', b'a', 6]);
        assert_eq!(&frame[5..], b"status");
    }
}
