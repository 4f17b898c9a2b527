//! Reactors — control strategies running on a subset of a unit's vials.
//!
//! Each reactor owns its settings, its vials' curves and histories, and
//! drives the shared [`Controls`] on every broadcast.  Several reactors
//! may share one unit as long as their vial sets are disjoint.
//!
//! ```text
//!  Broadcast ──▶ ReactorCore::pre_update ──▶ strategy ──▶ Controls ──▶ CommandSink
//!                 readout · history ·          (chemostat)
//!                 temperature · gating · end stops
//! ```

pub mod chemostat;

use std::collections::BTreeSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::app::controls::Controls;
use crate::app::events::{UpdateMsg, VialRecord};
use crate::app::ports::CommandSink;
use crate::calibration::set::{CalibrationSet, FitSet};
use crate::config::ControlConfig;
use crate::control::smoothing::MAX_WINDOW;
use crate::error::{ConfigurationError, Error, Result};
use crate::rpc::command::PUMP_CHANNELS;
use crate::rpc::inbound::{Broadcast, config_keys};
use crate::sensors::temperature::TemperatureGuard;
use crate::sensors::{VialReadout, VialSensors};

// ───────────────────────────────────────────────────────────────
// Settings
// ───────────────────────────────────────────────────────────────

/// Settings shared by every reactor.  Immutable for an experiment.
///
/// Per-vial arrays are indexed like `vials`.  `temp`, `stir` and
/// `led_power` may be left empty to keep the device's current value;
/// `start_delays` and `durations` may be left empty for "start now, run
/// forever".  Times are in units of `secs_per_unit_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorSettings {
    pub vials: Vec<usize>,
    pub volume_ml: f64,
    /// Temperature setpoint (°C).
    pub temp: Vec<f64>,
    pub stir: Vec<f64>,
    pub led_power: Vec<f64>,
    pub start_delays: Vec<f64>,
    /// Non-positive means unbounded.
    pub durations: Vec<f64>,
    /// OD/temperature history window.
    pub mem_len: usize,
}

impl Default for ReactorSettings {
    fn default() -> Self {
        Self {
            vials: Vec::new(),
            volume_ml: 30.0,
            temp: Vec::new(),
            stir: Vec::new(),
            led_power: Vec::new(),
            start_delays: Vec::new(),
            durations: Vec::new(),
            mem_len: 1,
        }
    }
}

impl ReactorSettings {
    /// Names of the per-vial arrays whose length does not match `vials`.
    pub fn mismatched_fields(&self) -> Vec<&'static str> {
        let n = self.vials.len();
        [
            ("temp", self.temp.len()),
            ("stir", self.stir.len()),
            ("power", self.led_power.len()),
            ("start_delay", self.start_delays.len()),
            ("duration", self.durations.len()),
        ]
        .into_iter()
        .filter(|&(_, len)| len != 0 && len != n)
        .map(|(name, _)| name)
        .collect()
    }

    /// Everything except the per-vial lengths, which callers collect
    /// together with their own arrays.
    pub fn validate_scalars(&self, num_vials: usize) -> Result<()> {
        if self.vials.is_empty() {
            return Err(Error::config("reactor has no vials"));
        }
        let mut seen = BTreeSet::new();
        for &vial in &self.vials {
            if vial >= num_vials {
                return Err(ConfigurationError::VialOutOfRange { vial, num_vials }.into());
            }
            if !seen.insert(vial) {
                return Err(Error::config(format!("vial {vial} listed twice")));
            }
        }
        if !(self.volume_ml.is_finite() && self.volume_ml > 0.0) {
            return Err(Error::config(format!("volume must be positive, got {}", self.volume_ml)));
        }
        if !(1..=MAX_WINDOW).contains(&self.mem_len) {
            return Err(Error::config(format!(
                "mem_len must be in 1..={MAX_WINDOW}, got {}",
                self.mem_len
            )));
        }
        Ok(())
    }

    pub fn validate(&self, num_vials: usize) -> Result<()> {
        let fields = self.mismatched_fields();
        if !fields.is_empty() {
            return Err(ConfigurationError::VialCountMismatch { fields }.into());
        }
        self.validate_scalars(num_vials)
    }
}

// ───────────────────────────────────────────────────────────────
// Reactor trait
// ───────────────────────────────────────────────────────────────

/// A control strategy bound to a set of vials.
pub trait Reactor {
    fn name(&self) -> &str;

    fn vials(&self) -> &[usize];

    /// Send initial stir, LED and temperature setpoints.
    fn start(&mut self, controls: &mut Controls, sink: &mut dyn CommandSink) -> Result<()>;

    /// Process one broadcast.
    fn update(
        &mut self,
        controls: &mut Controls,
        sink: &mut dyn CommandSink,
        broadcast: &Broadcast,
    ) -> Result<UpdateMsg>;

    fn replace_calibrations(&mut self, calibrations: &CalibrationSet) -> Result<()>;

    /// Stop every pump of this reactor's vials.
    fn stop(&mut self, controls: &mut Controls, sink: &mut dyn CommandSink) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Shared reactor behaviour
// ───────────────────────────────────────────────────────────────

/// Result of the steps every reactor runs before its own logic.
#[derive(Debug, Clone)]
pub struct PreUpdate {
    /// Broadcast timestamp.
    pub time: f64,
    /// At least one vial is past its start delay.
    pub started: bool,
    pub readout: Vec<VialReadout>,
    /// End-of-run stops issued this tick.
    pub records: Vec<VialRecord>,
}

/// State and behaviour common to every reactor.
pub struct ReactorCore {
    name: String,
    settings: ReactorSettings,
    sensors: VialSensors,
    temperature: TemperatureGuard,
    secs_per_unit_time: f64,
    /// First broadcast timestamp; start and end times hang off it.
    birth: Option<f64>,
    stopped: BTreeSet<usize>,
}

impl ReactorCore {
    pub fn new(
        name: &str,
        settings: ReactorSettings,
        calibrations: &CalibrationSet,
        config: &ControlConfig,
    ) -> Result<Self> {
        settings.validate(config.num_vials)?;
        let sensors = VialSensors::new(calibrations, &settings.vials, settings.mem_len)?;
        let temperature = TemperatureGuard::new(&settings.vials, &settings.temp, config.max_temp_delta_c);
        Ok(Self {
            name: name.to_owned(),
            sensors,
            temperature,
            secs_per_unit_time: config.secs_per_unit_time,
            birth: None,
            stopped: BTreeSet::new(),
            settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ReactorSettings {
        &self.settings
    }

    pub fn vials(&self) -> &[usize] {
        &self.settings.vials
    }

    pub fn volume_ml(&self) -> f64 {
        self.settings.volume_ml
    }

    pub fn sensors(&self) -> &VialSensors {
        &self.sensors
    }

    pub fn fits(&self, vial: usize) -> Result<&FitSet> {
        self.sensors
            .fits(vial)
            .ok_or_else(|| Error::config(format!("vial {vial} does not belong to reactor '{}'", self.name)))
    }

    fn index_of(&self, vial: usize) -> Option<usize> {
        self.settings.vials.iter().position(|&v| v == vial)
    }

    /// Absolute start time of `vial`, once the first broadcast is seen.
    pub fn start_time(&self, vial: usize) -> Option<f64> {
        let birth = self.birth?;
        let i = self.index_of(vial)?;
        let delay = self.settings.start_delays.get(i).copied().unwrap_or(0.0);
        Some(birth + delay * self.secs_per_unit_time)
    }

    /// Absolute end time of `vial`; infinite when unbounded.
    pub fn end_time(&self, vial: usize) -> Option<f64> {
        let start = self.start_time(vial)?;
        let i = self.index_of(vial)?;
        match self.settings.durations.get(i).copied() {
            Some(d) if d > 0.0 => Some(start + d * self.secs_per_unit_time),
            _ => Some(f64::INFINITY),
        }
    }

    /// `vial` is inside its run window at `time`.
    pub fn is_running(&self, vial: usize, time: f64) -> bool {
        match (self.start_time(vial), self.end_time(vial)) {
            (Some(start), Some(end)) => start <= time && time <= end,
            _ => false,
        }
    }

    /// `vial` has been stopped for good.
    pub fn has_ended(&self, vial: usize) -> bool {
        self.stopped.contains(&vial)
    }

    /// Send the configured stir, LED and temperature setpoints.
    pub fn start(&mut self, controls: &mut Controls, sink: &mut dyn CommandSink) -> Result<()> {
        let vials = self.settings.vials.clone();
        if !self.settings.stir.is_empty() {
            controls.update_stir_rate(sink, &vials, &self.settings.stir, true)?;
        }
        if !self.settings.led_power.is_empty() {
            controls.update_led_power(sink, &vials, &self.settings.led_power, true)?;
        }
        if !self.temperature.is_empty() {
            let (temp_vials, raws) = self.temperature.raw_setpoints(&self.sensors);
            if temp_vials.len() != vials.len() {
                return Err(Error::config(format!(
                    "reactor '{}': temperature setpoints not representable on every vial",
                    self.name
                )));
            }
            controls.update_temperature(sink, &temp_vials, &raws, true)?;
        }
        info!("reactor '{}' started on vials {:?}", self.name, vials);
        Ok(())
    }

    /// Readout, history, temperature supervision, start gate, end stops.
    pub fn pre_update(
        &mut self,
        controls: &mut Controls,
        sink: &mut dyn CommandSink,
        broadcast: &Broadcast,
    ) -> Result<PreUpdate> {
        let time = broadcast.timestamp;
        self.birth.get_or_insert(time);

        let readout = self.sensors.record(broadcast);

        if !self.temperature.is_empty() {
            let echoed = broadcast.config_values(config_keys::TEMP);
            if let Some((vials, raws)) = self.temperature.check(&self.sensors, &readout, &echoed) {
                controls.update_temperature(sink, &vials, &raws, false)?;
            }
        }

        let first_start = self
            .settings
            .vials
            .iter()
            .filter_map(|&v| self.start_time(v))
            .fold(f64::INFINITY, f64::min);
        if time < first_start {
            debug!(
                "reactor '{}': not at start time yet ({:.0}s to go)",
                self.name,
                first_start - time
            );
            return Ok(PreUpdate {
                time,
                started: false,
                readout,
                records: Vec::new(),
            });
        }

        let to_stop: Vec<usize> = self
            .settings
            .vials
            .iter()
            .copied()
            .filter(|&v| !self.stopped.contains(&v))
            .filter(|&v| self.end_time(v).is_some_and(|end| time > end))
            .collect();
        let mut records = Vec::with_capacity(to_stop.len());
        if !to_stop.is_empty() {
            info!("reactor '{}': vials {:?} reached their end time", self.name, to_stop);
            controls.stop_pumps(sink, &to_stop, &PUMP_CHANNELS)?;
            for vial in to_stop {
                self.stopped.insert(vial);
                records.push(VialRecord::Stop { vial });
            }
        }

        Ok(PreUpdate {
            time,
            started: true,
            readout,
            records,
        })
    }

    pub fn replace_calibrations(&mut self, calibrations: &CalibrationSet) -> Result<()> {
        self.sensors.replace_calibrations(calibrations)?;
        info!("reactor '{}' switched to new calibrations", self.name);
        Ok(())
    }

    /// Stop every pump on this reactor's vials.
    pub fn stop(&mut self, controls: &mut Controls, sink: &mut dyn CommandSink) -> Result<()> {
        let vials = self.settings.vials.clone();
        controls.stop_pumps(sink, &vials, &PUMP_CHANNELS)?;
        self.stopped.extend(vials);
        Ok(())
    }

    /// Update message carrying the latest readings.
    pub fn update_msg(&self, time: Option<f64>, records: Vec<VialRecord>) -> UpdateMsg {
        UpdateMsg {
            time,
            records,
            vials: self.settings.vials.clone(),
            od: self.sensors.latest_od(),
            temp: self.sensors.latest_temp(),
        }
    }
}
