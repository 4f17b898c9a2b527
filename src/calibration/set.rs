//! Per-unit calibration set built from the device's calibration records.
//!
//! The device reports one record per sensor kind.  OD and temperature
//! records carry one coefficient entry per vial; the pump record carries
//! `3 * N` entries laid out as the IN1 block, then IN2, then OUT.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use super::{CurveRef, build_curve};
use crate::error::{ConfigurationError, DomainError, Error, Result};
use crate::rpc::command::{PUMP_CHANNELS, PumpChannel};

// ───────────────────────────────────────────────────────────────
// Wire records
// ───────────────────────────────────────────────────────────────

/// One coefficient entry.  Pump records send bare numbers, sometimes
/// string-encoded; curve records send a parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoefficientEntry {
    Vector(Vec<f64>),
    Number(f64),
    Text(String),
}

impl CoefficientEntry {
    pub fn to_params(&self) -> Result<Vec<f64>> {
        match self {
            Self::Vector(v) => Ok(v.clone()),
            Self::Number(n) => Ok(vec![*n]),
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(|n| vec![n])
                .map_err(|_| Error::config(format!("coefficient '{s}' is not a number"))),
        }
    }
}

/// A fitted calibration as the device stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRecord {
    pub name: String,
    pub coefficients: Vec<CoefficientEntry>,
    /// Family tag, e.g. `"sigmoid"`.
    #[serde(rename = "type")]
    pub family: String,
    #[serde(default)]
    pub time_fit: Option<f64>,
    #[serde(default)]
    pub active: bool,
    /// Broadcast data fields feeding the curve.  The first one is read.
    #[serde(default)]
    pub params: Vec<String>,
}

/// All fits stored for one sensor kind, as listed by `activecalibrations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorCalibration {
    #[serde(default)]
    pub name: Option<String>,
    pub calibration_type: String,
    #[serde(default)]
    pub fits: Vec<CalibrationRecord>,
}

/// The active record for each sensor kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveCalibrations {
    pub od: Option<CalibrationRecord>,
    pub temp: Option<CalibrationRecord>,
    pub pump: Option<CalibrationRecord>,
}

impl ActiveCalibrations {
    /// Pick the active fit of every sensor kind.
    pub fn from_sensor_calibrations(list: &[SensorCalibration]) -> Self {
        let mut out = Self::default();
        for cal in list {
            let slot = match cal.calibration_type.as_str() {
                "od" => &mut out.od,
                "temperature" | "temp" => &mut out.temp,
                "pump" => &mut out.pump,
                other => {
                    debug!("ignoring calibration type '{other}'");
                    continue;
                }
            };
            if let Some(fit) = cal.fits.iter().find(|f| f.active) {
                *slot = Some(fit.clone());
            }
        }
        out
    }

    pub fn is_complete(&self) -> bool {
        self.od.is_some() && self.temp.is_some() && self.pump.is_some()
    }
}

// ───────────────────────────────────────────────────────────────
// CalibrationSet
// ───────────────────────────────────────────────────────────────

/// OD, temperature and pump curves for every vial of one unit.
///
/// Immutable; recalibration builds a new set.
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    num_vials: usize,
    od_sensor: String,
    temp_sensor: String,
    od: Vec<CurveRef>,
    temp: Vec<CurveRef>,
    /// Indexed by [`PumpChannel::index`].
    pump: [Vec<CurveRef>; 3],
}

/// The curves serving one vial.
#[derive(Debug, Clone)]
pub struct FitSet {
    pub vial: usize,
    pub od: CurveRef,
    pub temp: CurveRef,
    pub in1: CurveRef,
    pub in2: CurveRef,
    pub out: CurveRef,
}

/// Flow rate of each pump channel in mL/s, indexed by [`PumpChannel::index`].
pub type ChannelFlows = [f64; 3];

impl FitSet {
    pub fn pump(&self, channel: PumpChannel) -> &CurveRef {
        match channel {
            PumpChannel::In1 => &self.in1,
            PumpChannel::In2 => &self.in2,
            PumpChannel::Out => &self.out,
        }
    }

    /// Pump flow rates, from each pump curve evaluated at zero.
    pub fn flows(&self) -> Result<ChannelFlows> {
        let mut flows = [0.0; 3];
        for ch in PUMP_CHANNELS {
            let rate = self.pump(ch).equation(0.0)?;
            if rate <= 0.0 {
                return Err(DomainError {
                    family: self.pump(ch).family().tag(),
                    op: "flow",
                    input: rate,
                    reason: "pump flow rate must be positive",
                }
                .into());
            }
            flows[ch.index()] = rate;
        }
        Ok(flows)
    }
}

impl CalibrationSet {
    /// Build every curve from the active OD, temperature and pump records.
    pub fn from_records(
        od: &CalibrationRecord,
        temp: &CalibrationRecord,
        pump: &CalibrationRecord,
        num_vials: usize,
    ) -> Result<Self> {
        let od_sensor = first_sensor(od, "od")?;
        let temp_sensor = first_sensor(temp, "temperature")?;
        let od_curves = build_block(od, &od.coefficients, num_vials, "od")?;
        let temp_curves = build_block(temp, &temp.coefficients, num_vials, "temperature")?;

        if pump.coefficients.len() != 3 * num_vials {
            return Err(Error::config(format!(
                "pump calibration '{}' has {} coefficient entries, expected {}",
                pump.name,
                pump.coefficients.len(),
                3 * num_vials
            )));
        }
        let mut blocks = pump.coefficients.chunks(num_vials.max(1));
        let mut next_block = |label| -> Result<Vec<CurveRef>> {
            let block = blocks.next().unwrap_or(&[]);
            build_block(pump, block, num_vials, label)
        };
        let in1 = next_block("pump IN1")?;
        let in2 = next_block("pump IN2")?;
        let out = next_block("pump OUT")?;

        Ok(Self {
            num_vials,
            od_sensor,
            temp_sensor,
            od: od_curves,
            temp: temp_curves,
            pump: [in1, in2, out],
        })
    }

    /// Build from the active records reported by the device.
    pub fn from_active(active: &ActiveCalibrations, num_vials: usize) -> Result<Self> {
        let missing = |kind: &str| Error::config(format!("no active {kind} calibration"));
        let od = active.od.as_ref().ok_or_else(|| missing("od"))?;
        let temp = active.temp.as_ref().ok_or_else(|| missing("temperature"))?;
        let pump = active.pump.as_ref().ok_or_else(|| missing("pump"))?;
        Self::from_records(od, temp, pump, num_vials)
    }

    /// Same curves on every vial.
    pub fn uniform(
        num_vials: usize,
        od_sensor: &str,
        temp_sensor: &str,
        od: CurveRef,
        temp: CurveRef,
        pump: [CurveRef; 3],
    ) -> Self {
        let [in1, in2, out] = pump;
        Self {
            num_vials,
            od_sensor: od_sensor.to_owned(),
            temp_sensor: temp_sensor.to_owned(),
            od: vec![od; num_vials],
            temp: vec![temp; num_vials],
            pump: [vec![in1; num_vials], vec![in2; num_vials], vec![out; num_vials]],
        }
    }

    pub fn num_vials(&self) -> usize {
        self.num_vials
    }

    /// Broadcast data field read for OD.
    pub fn od_sensor(&self) -> &str {
        &self.od_sensor
    }

    /// Broadcast data field read for temperature.
    pub fn temp_sensor(&self) -> &str {
        &self.temp_sensor
    }

    pub fn fit_set(&self, vial: usize) -> Result<FitSet> {
        if vial >= self.num_vials {
            return Err(ConfigurationError::VialOutOfRange {
                vial,
                num_vials: self.num_vials,
            }
            .into());
        }
        Ok(FitSet {
            vial,
            od: self.od[vial].clone(),
            temp: self.temp[vial].clone(),
            in1: self.pump[0][vial].clone(),
            in2: self.pump[1][vial].clone(),
            out: self.pump[2][vial].clone(),
        })
    }

    /// Fit sets for `vials`, keyed by vial.
    pub fn fit_sets(&self, vials: &[usize]) -> Result<BTreeMap<usize, FitSet>> {
        vials.iter().map(|&v| Ok((v, self.fit_set(v)?))).collect()
    }
}

fn first_sensor(record: &CalibrationRecord, kind: &str) -> Result<String> {
    record
        .params
        .first()
        .cloned()
        .ok_or_else(|| Error::config(format!("{kind} calibration '{}' lists no sensors", record.name)))
}

fn build_block(
    record: &CalibrationRecord,
    entries: &[CoefficientEntry],
    num_vials: usize,
    label: &str,
) -> Result<Vec<CurveRef>> {
    if entries.len() != num_vials {
        return Err(Error::config(format!(
            "{label} calibration '{}' has {} coefficient entries, expected {num_vials}",
            record.name,
            entries.len()
        )));
    }
    entries
        .iter()
        .map(|entry| build_curve(&record.family, &entry.to_params()?))
        .collect()
}
