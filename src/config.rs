//! Controller configuration parameters
//!
//! Hardware limits of the fluidics and the tunables of the dilution
//! planner.  Loaded from the experiment file; every field has a default
//! matching the stock 16-vial unit.

use serde::{Deserialize, Serialize};

use crate::control::dilution::PlannerParams;
use crate::error::{Error, Result};
use crate::safety::PumpLimits;

/// Core controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    // --- Unit ---
    /// Vials sharing one unit's pumps
    pub num_vials: usize,

    // --- Fluidics ---
    /// Extra outflow volume (mL) added to every efflux so the vial never fills
    pub outflow_extra_ml: f64,
    /// Smallest bolus a pump can deliver accurately (mL)
    pub bolus_volume_min_ml: f64,
    /// Largest single one-shot bolus (mL)
    pub bolus_volume_max_ml: f64,
    /// Largest bolus of a standing (recurring) program (mL)
    pub bolus_repeat_max_ml: f64,
    /// Longest a pump may run for a single pulse (seconds)
    pub pump_time_max_secs: f64,
    /// Minimum time between two pulses of a standing program (seconds)
    pub min_pump_period_secs: f64,
    /// Seconds per configured unit of time (rates are per hour by default)
    pub secs_per_unit_time: f64,

    // --- Serial dilution planner ---
    /// Exponent of the robustness correction
    pub dilution_pow_param: f64,
    /// Additive offset of the robustness correction
    pub dilution_const_param: f64,

    // --- Wire ---
    /// Decimal places used for pump seconds on the wire
    pub float_resolution: usize,

    // --- Temperature ---
    /// Tolerated gap between reading and setpoint before resyncing (°C)
    pub max_temp_delta_c: f64,

    // --- Calibration queries ---
    /// Deadline for a calibration response (milliseconds)
    pub calibration_timeout_ms: u64,
    /// Poll period while waiting for a calibration response (milliseconds)
    pub calibration_poll_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            num_vials: 16,

            outflow_extra_ml: 5.0,
            bolus_volume_min_ml: 0.2,
            bolus_volume_max_ml: 15.0,
            bolus_repeat_max_ml: 5.0,
            pump_time_max_secs: 18.0,
            min_pump_period_secs: 120.0,
            secs_per_unit_time: 3600.0,

            dilution_pow_param: 1.0,
            dilution_const_param: 1.0,

            float_resolution: 2,

            max_temp_delta_c: 0.2,

            calibration_timeout_ms: 10_000,
            calibration_poll_ms: 200,
        }
    }
}

impl ControlConfig {
    /// Reject values that would make the fluidics unsafe or the maths undefined.
    pub fn validate(&self) -> Result<()> {
        if self.num_vials == 0 {
            return Err(Error::config("num_vials must be at least 1"));
        }
        let positive = [
            ("bolus_volume_min_ml", self.bolus_volume_min_ml),
            ("bolus_volume_max_ml", self.bolus_volume_max_ml),
            ("bolus_repeat_max_ml", self.bolus_repeat_max_ml),
            ("pump_time_max_secs", self.pump_time_max_secs),
            ("min_pump_period_secs", self.min_pump_period_secs),
            ("secs_per_unit_time", self.secs_per_unit_time),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::config(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.outflow_extra_ml.is_finite() && self.outflow_extra_ml >= 0.0) {
            return Err(Error::config("outflow_extra_ml must be non-negative"));
        }
        if self.bolus_volume_min_ml > self.bolus_volume_max_ml {
            return Err(Error::config("bolus_volume_min_ml exceeds bolus_volume_max_ml"));
        }
        if self.bolus_volume_min_ml > self.bolus_repeat_max_ml {
            return Err(Error::config("bolus_volume_min_ml exceeds bolus_repeat_max_ml"));
        }
        if self.float_resolution > 6 {
            return Err(Error::config("float_resolution above 6 decimal places"));
        }
        if self.calibration_poll_ms == 0 || self.calibration_poll_ms > self.calibration_timeout_ms {
            return Err(Error::config(
                "calibration_poll_ms must be non-zero and below calibration_timeout_ms",
            ));
        }
        Ok(())
    }

    /// Limits consumed by the bolus/rate safety clamp.
    pub fn pump_limits(&self) -> PumpLimits {
        PumpLimits {
            min_pump_period_secs: self.min_pump_period_secs,
            bolus_repeat_max_ml: self.bolus_repeat_max_ml,
            bolus_volume_min_ml: self.bolus_volume_min_ml,
            secs_per_unit_time: self.secs_per_unit_time,
        }
    }

    /// Parameters consumed by the serial-dilution planner.
    pub fn planner_params(&self) -> PlannerParams {
        PlannerParams {
            pow_param: self.dilution_pow_param,
            const_param: self.dilution_const_param,
            bolus_volume_min_ml: self.bolus_volume_min_ml,
            bolus_volume_max_ml: self.bolus_volume_max_ml,
        }
    }
}
