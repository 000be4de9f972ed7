//! Magnetic-calibration field decoding.
//!
//! The device reports alignment results as fixed-point u16 fields inside
//! the stored-calibration payload. Decoding is pure and total: every
//! 16-bit input maps to a finite engineering value.

use serde::Serialize;
use serde_json::Value;

use crate::error::DecodeError;

/// Interpretation applied to a raw 16-bit calibration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Signed hard-iron axis offset, ±8 units full scale.
    Axis,
    /// Unsigned soft-iron ratio in [0, 1].
    Ratio,
    /// Signed soft-iron angle in radians, ±π full scale.
    Angle,
}

/// Decode one raw field into engineering units.
///
/// `Axis` and `Angle` treat the value as two's-complement, so `0x8000`
/// decodes to the negative full-scale value (−8.0 and −π respectively);
/// `Ratio` spans [0, 1] with `0xFFFF` → 1.0 exactly.
pub fn decode_field(raw: u16, kind: FieldKind) -> f64 {
    match kind {
        FieldKind::Axis => f64::from(raw as i16) / f64::from(1u32 << 15) * 8.0,
        FieldKind::Ratio => f64::from(raw) / f64::from(u16::MAX),
        FieldKind::Angle => f64::from(raw as i16) / (f64::from(1u32 << 15) / std::f64::consts::PI),
    }
}

// ---------------------------------------------------------------------------
// Stored-payload layout
// ---------------------------------------------------------------------------

// The four calibration fields sit at hex-character offsets [16:20) [20:24)
// [24:28) [28:32) of the hex-encoded payload: big-endian u16s at byte
// offsets 8, 10, 12 and 14.
const FIELD_OFFSETS: [usize; 4] = [8, 10, 12, 14];
const MIN_PAYLOAD_LEN: usize = 16;

/// One decoded calibration field with its presentation labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationField {
    pub name: &'static str,
    /// Short machine key ("hard_iron_x", …).
    pub argument: &'static str,
    pub value: f64,
}

/// The four magnetic-compensation values produced by a completed
/// alignment. Created once at the end of a successful workflow and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationResult {
    pub hard_iron_x: f64,
    pub hard_iron_y: f64,
    pub soft_iron_ratio: f64,
    pub soft_iron_angle: f64,
}

impl CalibrationResult {
    /// Presentation form: name / key / value triples in report order.
    pub fn fields(&self) -> [CalibrationField; 4] {
        [
            CalibrationField {
                name: "Hard Iron X",
                argument: "hard_iron_x",
                value: self.hard_iron_x,
            },
            CalibrationField {
                name: "Hard Iron Y",
                argument: "hard_iron_y",
                value: self.hard_iron_y,
            },
            CalibrationField {
                name: "Soft Iron Ratio",
                argument: "soft_iron_ratio",
                value: self.soft_iron_ratio,
            },
            CalibrationField {
                name: "Soft Iron Angle",
                argument: "soft_iron_angle",
                value: self.soft_iron_angle,
            },
        ]
    }

    /// Event-payload form: the field list as JSON.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.fields()).unwrap_or(Value::Null)
    }
}

/// Decode the stored-calibration payload into a [`CalibrationResult`].
pub fn decode_mag_align(payload: &[u8]) -> Result<CalibrationResult, DecodeError> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::ShortPayload {
            expected: MIN_PAYLOAD_LEN,
            got: payload.len(),
        });
    }

    let field = |i: usize| u16::from_be_bytes([payload[FIELD_OFFSETS[i]], payload[FIELD_OFFSETS[i] + 1]]);

    Ok(CalibrationResult {
        hard_iron_x: decode_field(field(0), FieldKind::Axis),
        hard_iron_y: decode_field(field(1), FieldKind::Axis),
        soft_iron_ratio: decode_field(field(2), FieldKind::Ratio),
        soft_iron_angle: decode_field(field(3), FieldKind::Angle),
    })
}
