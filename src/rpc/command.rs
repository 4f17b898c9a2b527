//! Outbound command types and their wire encoding.
//!
//! The device addresses the whole unit at once: a pump command carries
//! `3 * N` values, one per (vial, channel), at index `vial + channel * N`.
//!
//! | Value             | Wire form      |
//! |-------------------|----------------|
//! | no change         | `"--"`         |
//! | stop              | `"0"`          |
//! | one-shot seconds  | `"5.50"`       |
//! | recurring program | `"5.50|7200.00"` (seconds on, period seconds) |

use core::fmt;

use serde_json::{Value, json};

use crate::calibration::set::CalibrationRecord;
use crate::error::{ConfigurationError, Error, Result};

use super::WireMessage;

// ───────────────────────────────────────────────────────────────
// Pump channels
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PumpChannel {
    In1,
    In2,
    Out,
}

/// Every channel in wire order.
pub const PUMP_CHANNELS: [PumpChannel; 3] = [PumpChannel::In1, PumpChannel::In2, PumpChannel::Out];

impl PumpChannel {
    /// Block index in the wire vector.
    pub fn index(self) -> usize {
        match self {
            Self::In1 => 0,
            Self::In2 => 1,
            Self::Out => 2,
        }
    }

    pub fn from_index(i: usize) -> Option<Self> {
        PUMP_CHANNELS.get(i).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::In1 => "IN1",
            Self::In2 => "IN2",
            Self::Out => "OUT",
        }
    }
}

impl fmt::Display for PumpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ───────────────────────────────────────────────────────────────
// PumpValue
// ───────────────────────────────────────────────────────────────

const NO_CHANGE: &str = "--";
/// Older firmware pads stop commands with this instead of `--`.
const NO_CHANGE_LEGACY: &str = "__";
const STOP: &str = "0";
const RECURRING_DELIMITER: char = '|';

/// One (vial, channel) slot of a pump command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpValue {
    NoChange,
    Stop,
    /// Run once for this many seconds.
    Seconds(f64),
    /// Run `secs` every `period` seconds until replaced.
    Recurring { secs: f64, period: f64 },
}

impl PumpValue {
    pub fn is_no_change(&self) -> bool {
        matches!(self, Self::NoChange)
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Recurring { .. })
    }

    /// Seconds of pumping this slot requests per activation.
    pub fn secs(&self) -> f64 {
        match *self {
            Self::Seconds(s) | Self::Recurring { secs: s, .. } => s,
            Self::NoChange | Self::Stop => 0.0,
        }
    }

    /// Encode with `resolution` decimal places.
    pub fn encode(&self, resolution: usize) -> String {
        match *self {
            Self::NoChange => NO_CHANGE.to_owned(),
            Self::Stop => STOP.to_owned(),
            Self::Seconds(s) => format!("{s:.resolution$}"),
            Self::Recurring { secs, period } => {
                format!("{secs:.resolution$}{RECURRING_DELIMITER}{period:.resolution$}")
            }
        }
    }

    /// Decode one wire slot.  A zero duration is a stop.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == NO_CHANGE || s == NO_CHANGE_LEGACY {
            return Ok(Self::NoChange);
        }
        if let Some((secs, period)) = s.split_once(RECURRING_DELIMITER) {
            let secs = parse_duration(secs)?;
            let period = parse_duration(period)?;
            if period <= 0.0 {
                return Err(Error::Protocol(format!("recurring period must be positive in '{s}'")));
            }
            return Ok(if secs == 0.0 {
                Self::Stop
            } else {
                Self::Recurring { secs, period }
            });
        }
        let secs = parse_duration(s)?;
        Ok(if secs == 0.0 { Self::Stop } else { Self::Seconds(secs) })
    }

    /// Decode a numeric slot as echoed in a broadcast config.
    pub fn from_number(n: f64) -> Result<Self> {
        if !n.is_finite() || n < 0.0 {
            return Err(Error::Protocol(format!("invalid pump duration {n}")));
        }
        Ok(if n == 0.0 { Self::Stop } else { Self::Seconds(n) })
    }
}

fn parse_duration(s: &str) -> Result<f64> {
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("'{s}' is not a pump duration")))?;
    if !v.is_finite() || v < 0.0 {
        return Err(Error::Protocol(format!("pump duration '{s}' out of range")));
    }
    Ok(v)
}

// ───────────────────────────────────────────────────────────────
// PumpCommandVector
// ───────────────────────────────────────────────────────────────

/// Unit-wide pump values, the atomic unit of transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpCommandVector {
    num_vials: usize,
    values: Vec<PumpValue>,
}

impl PumpCommandVector {
    /// All slots `NoChange`.
    pub fn new(num_vials: usize) -> Self {
        Self {
            num_vials,
            values: vec![PumpValue::NoChange; 3 * num_vials],
        }
    }

    /// All slots `Stop`.
    pub fn stop_all(num_vials: usize) -> Self {
        Self {
            num_vials,
            values: vec![PumpValue::Stop; 3 * num_vials],
        }
    }

    pub fn num_vials(&self) -> usize {
        self.num_vials
    }

    fn slot(&self, vial: usize, channel: PumpChannel) -> Result<usize> {
        if vial >= self.num_vials {
            return Err(ConfigurationError::VialOutOfRange {
                vial,
                num_vials: self.num_vials,
            }
            .into());
        }
        Ok(vial + channel.index() * self.num_vials)
    }

    pub fn set(&mut self, vial: usize, channel: PumpChannel, value: PumpValue) -> Result<()> {
        let i = self.slot(vial, channel)?;
        self.values[i] = value;
        Ok(())
    }

    pub fn get(&self, vial: usize, channel: PumpChannel) -> Option<PumpValue> {
        self.slot(vial, channel).ok().map(|i| self.values[i])
    }

    pub fn values(&self) -> &[PumpValue] {
        &self.values
    }

    /// True when no slot changes anything.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(PumpValue::is_no_change)
    }

    /// Every slot that changes something, as `(vial, channel, value)`.
    pub fn touched(&self) -> impl Iterator<Item = (usize, PumpChannel, PumpValue)> + '_ {
        let n = self.num_vials;
        self.values.iter().enumerate().filter(|(_, v)| !v.is_no_change()).filter_map(move |(i, v)| {
            PumpChannel::from_index(i / n).map(|ch| (i % n, ch, *v))
        })
    }

    pub fn encode(&self, resolution: usize) -> Vec<String> {
        self.values.iter().map(|v| v.encode(resolution)).collect()
    }

    /// Decode a wire vector of exactly `3 * num_vials` slots.
    pub fn decode<S: AsRef<str>>(slots: &[S], num_vials: usize) -> Result<Self> {
        if slots.len() != 3 * num_vials {
            return Err(Error::Protocol(format!(
                "pump vector has {} slots, expected {}",
                slots.len(),
                3 * num_vials
            )));
        }
        let values = slots.iter().map(|s| PumpValue::parse(s.as_ref())).collect::<Result<_>>()?;
        Ok(Self { num_vials, values })
    }
}

// ───────────────────────────────────────────────────────────────
// Setpoint vectors
// ───────────────────────────────────────────────────────────────

/// Per-vial setpoints; `None` leaves that vial untouched (`"NaN"` on the wire).
#[derive(Debug, Clone, PartialEq)]
pub struct SetpointVector {
    pub values: Vec<Option<f64>>,
    pub immediate: bool,
}

impl SetpointVector {
    pub fn get(&self, vial: usize) -> Option<f64> {
        self.values.get(vial).copied().flatten()
    }

    fn payload(&self, param: &str) -> Value {
        let values: Vec<Value> = self
            .values
            .iter()
            .map(|v| match v {
                Some(x) => json!(x),
                None => json!("NaN"),
            })
            .collect();
        json!({
            "param": param,
            "value": values,
            "immediate": self.immediate,
            "recurring": true,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Command
// ───────────────────────────────────────────────────────────────

/// Every message the controller sends to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Pump {
        values: PumpCommandVector,
        recurring: bool,
        immediate: bool,
    },
    Stir(SetpointVector),
    Temperature(SetpointVector),
    OdLed(SetpointVector),
    GetActiveCalibrations,
    GetCalibration { name: String },
    GetCalibrationNames,
    SetFitCalibration { name: String, fit: CalibrationRecord },
}

impl Command {
    /// Validated pump command.  Recurring programs only travel in
    /// recurring commands and one-shot durations only in one-shot ones.
    pub fn pump(values: PumpCommandVector, recurring: bool, immediate: bool) -> Result<Self> {
        let misplaced = values.values().iter().find(|v| match v {
            PumpValue::Recurring { .. } => !recurring,
            PumpValue::Seconds(_) => recurring,
            PumpValue::NoChange | PumpValue::Stop => false,
        });
        if let Some(v) = misplaced {
            let kind = if recurring { "recurring" } else { "one-shot" };
            return Err(Error::Protocol(format!("{v:?} not allowed in a {kind} pump command")));
        }
        Ok(Self::Pump {
            values,
            recurring,
            immediate,
        })
    }

    /// Per-vial setpoint command, validated against the unit size.
    pub fn setpoints(
        param: SetpointParam,
        num_vials: usize,
        vials: &[usize],
        values: &[f64],
        immediate: bool,
    ) -> Result<Self> {
        if vials.len() != values.len() {
            return Err(Error::config(format!(
                "{} vials given but {} {} values",
                vials.len(),
                values.len(),
                param.wire_name()
            )));
        }
        let mut out = vec![None; num_vials];
        for (&vial, &value) in vials.iter().zip(values) {
            let slot = out
                .get_mut(vial)
                .ok_or(ConfigurationError::VialOutOfRange { vial, num_vials })?;
            if !value.is_finite() {
                return Err(Error::config(format!(
                    "{} value {value} for vial {vial} is not finite",
                    param.wire_name()
                )));
            }
            *slot = Some(value);
        }
        let v = SetpointVector { values: out, immediate };
        Ok(match param {
            SetpointParam::Stir => Self::Stir(v),
            SetpointParam::Temperature => Self::Temperature(v),
            SetpointParam::OdLed => Self::OdLed(v),
        })
    }

    /// Short human-readable kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pump { recurring: true, .. } => "pump(recurring)",
            Self::Pump { .. } => "pump",
            Self::Stir(_) => "stir",
            Self::Temperature(_) => "temp",
            Self::OdLed(_) => "od_led",
            Self::GetActiveCalibrations => "getactivecal",
            Self::GetCalibration { .. } => "getcalibration",
            Self::GetCalibrationNames => "getcalibrationnames",
            Self::SetFitCalibration { .. } => "setfitcalibration",
        }
    }

    /// Wire message with durations at `resolution` decimal places.
    pub fn to_wire(&self, resolution: usize) -> Result<WireMessage> {
        let (event, payload) = match self {
            Self::Pump {
                values,
                recurring,
                immediate,
            } => {
                let fields = 3 * values.num_vials() + 1;
                (
                    "command",
                    json!({
                        "param": "pump",
                        "value": values.encode(resolution),
                        "recurring": recurring,
                        "immediate": immediate,
                        "fields_expected_incoming": fields,
                        "fields_expected_outgoing": fields,
                    }),
                )
            }
            Self::Stir(v) => ("command", v.payload(SetpointParam::Stir.wire_name())),
            Self::Temperature(v) => ("command", v.payload(SetpointParam::Temperature.wire_name())),
            Self::OdLed(v) => ("command", v.payload(SetpointParam::OdLed.wire_name())),
            Self::GetActiveCalibrations => ("getactivecal", json!({})),
            Self::GetCalibration { name } => ("getcalibration", json!({ "name": name })),
            Self::GetCalibrationNames => ("getcalibrationnames", json!([])),
            Self::SetFitCalibration { name, fit } => {
                let fit = serde_json::to_value(fit).map_err(|e| Error::Protocol(e.to_string()))?;
                ("setfitcalibration", json!({ "name": name, "fit": fit }))
            }
        };
        Ok(WireMessage {
            event: event.to_owned(),
            payload,
        })
    }
}

/// Which per-vial setpoint a [`Command::setpoints`] call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointParam {
    Stir,
    Temperature,
    OdLed,
}

impl SetpointParam {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Stir => "stir",
            Self::Temperature => "temp",
            Self::OdLed => "od_led",
        }
    }
}
