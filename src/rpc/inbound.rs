//! Inbound messages: sensor broadcasts and calibration responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibration::set::{CalibrationRecord, SensorCalibration};
use crate::error::{Error, Result};

use super::WireMessage;
use super::command::PumpValue;

// ───────────────────────────────────────────────────────────────
// Loosely typed wire values
// ───────────────────────────────────────────────────────────────

/// The device sends numbers either bare or string-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Number(f64),
    Text(String),
}

impl WireValue {
    /// Numeric value; anything unparsable (including `"NaN"`) is NaN.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }

    pub fn as_pump_value(&self) -> Result<PumpValue> {
        match self {
            Self::Number(n) => PumpValue::from_number(*n),
            Self::Text(s) => PumpValue::parse(s),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Broadcast
// ───────────────────────────────────────────────────────────────

/// One echoed configuration parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamConfig {
    #[serde(default)]
    pub value: Vec<WireValue>,
    #[serde(default)]
    pub recurring: Option<bool>,
}

/// Broadcast config keys.
pub mod config_keys {
    pub const PUMP: &str = "pump";
    pub const STIR: &str = "stir";
    pub const TEMP: &str = "temp";
    pub const LED: &str = "lxml";
}

/// Periodic sensor snapshot pushed by the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    /// Raw readings keyed by sensor name (`od_90`, `od_135`, `temp`, ...).
    #[serde(default)]
    pub data: BTreeMap<String, Vec<WireValue>>,
    /// Echo of the device's current configuration.
    #[serde(default)]
    pub config: BTreeMap<String, ParamConfig>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub timestamp: f64,
}

impl Broadcast {
    /// Raw reading of `sensor` for `vial`; `None` if the field is absent.
    pub fn reading(&self, sensor: &str, vial: usize) -> Option<f64> {
        self.data.get(sensor).and_then(|v| v.get(vial)).map(WireValue::as_f64)
    }

    /// Echoed numeric values of one config parameter.
    pub fn config_values(&self, key: &str) -> Vec<f64> {
        self.config
            .get(key)
            .map(|p| p.value.iter().map(WireValue::as_f64).collect())
            .unwrap_or_default()
    }

    /// Echoed pump slots.  Unreadable slots decode as `NoChange`.
    pub fn pump_values(&self) -> Vec<PumpValue> {
        self.config
            .get(config_keys::PUMP)
            .map(|p| {
                p.value
                    .iter()
                    .map(|v| v.as_pump_value().unwrap_or(PumpValue::NoChange))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ───────────────────────────────────────────────────────────────
// Calibration responses
// ───────────────────────────────────────────────────────────────

/// One full calibration document, as returned by `getcalibration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationDocument {
    pub name: String,
    #[serde(default)]
    pub calibration_type: Option<String>,
    #[serde(default)]
    pub fits: Vec<CalibrationRecord>,
    /// Raw calibration data and anything else the device attaches.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One entry of the `calibrationnames` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationName {
    pub name: String,
    #[serde(default)]
    pub calibration_type: Option<String>,
}

// ───────────────────────────────────────────────────────────────
// Inbound
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Broadcast(Broadcast),
    ActiveCalibrations(Vec<SensorCalibration>),
    Calibration(CalibrationDocument),
    CalibrationNames(Vec<CalibrationName>),
}

impl Inbound {
    /// Decode a wire message.  Unknown events are protocol errors.
    pub fn decode(msg: &WireMessage) -> Result<Self> {
        fn payload<T: serde::de::DeserializeOwned>(msg: &WireMessage) -> Result<T> {
            T::deserialize(&msg.payload)
                .map_err(|e| Error::Protocol(format!("bad '{}' payload: {e}", msg.event)))
        }
        match msg.event.as_str() {
            "broadcast" => payload(msg).map(Self::Broadcast),
            "activecalibrations" => payload(msg).map(Self::ActiveCalibrations),
            "calibration" => payload(msg).map(Self::Calibration),
            "calibrationnames" => payload(msg).map(Self::CalibrationNames),
            other => Err(Error::Protocol(format!("unknown event '{other}'"))),
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            Self::Broadcast(_) => "broadcast",
            Self::ActiveCalibrations(_) => "activecalibrations",
            Self::Calibration(_) => "calibration",
            Self::CalibrationNames(_) => "calibrationnames",
        }
    }

    /// Wire form, used when recording or replaying device traffic.
    pub fn to_wire(&self) -> Result<WireMessage> {
        let payload = match self {
            Self::Broadcast(b) => serde_json::to_value(b),
            Self::ActiveCalibrations(c) => serde_json::to_value(c),
            Self::Calibration(c) => serde_json::to_value(c),
            Self::CalibrationNames(n) => serde_json::to_value(n),
        }
        .map_err(|e| Error::Protocol(e.to_string()))?;
        Ok(WireMessage {
            event: self.event().to_owned(),
            payload,
        })
    }
}
