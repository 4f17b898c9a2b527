//! Chemostat — constant dilution rate per vial.
//!
//! Once a vial's smoothed OD reaches its `start_od`, a standing pump
//! program (bolus × rate per unit time) is started on it.  The device
//! then repeats the program on its own; the controller only restarts it
//! when the vial is processed again.
//!
//! ```text
//!  AwaitingFirstOd ──(window full)──▶ Active ──(program sent / on target)──▶ UpdatedThisTick
//!                                        ▲                                         │
//!                                        └────── next tick, unless every vial ─────┘
//!                                                is UpdatedThisTick (tick skipped)
//!  any ──(past end time)──▶ Ended
//! ```
//!
//! With `target_od` and `dilution_steps` set, the bolus comes from the
//! serial-dilution planner using the OD at activation as the reference;
//! otherwise the configured bolus is used.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::controls::{Controls, RepeatDilution};
use crate::app::events::{UpdateMsg, VialRecord};
use crate::app::ports::CommandSink;
use crate::calibration::set::CalibrationSet;
use crate::control::dilution::{PlannerParams, compute_bolus_volume};
use crate::control::ratio::PumpRatio;
use crate::error::{ConfigurationError, Result};
use crate::rpc::inbound::Broadcast;
use crate::safety::{ClampMode, clamp_bolus_rate};

use super::{Reactor, ReactorCore, ReactorSettings};

// ───────────────────────────────────────────────────────────────
// Settings
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChemostatSettings {
    #[serde(flatten)]
    pub base: ReactorSettings,
    /// OD a vial must reach before its program starts.
    pub start_od: Vec<f64>,
    /// Bolus volume per pulse (mL).
    pub bolus: Vec<f64>,
    /// Pulses per unit time.
    pub rates: Vec<f64>,
    pub pump_ratios: Vec<PumpRatio>,
    #[serde(default)]
    pub target_od: Vec<f64>,
    #[serde(default)]
    pub dilution_steps: Vec<u32>,
}

impl ChemostatSettings {
    /// Every per-vial array must have one entry per vial.  All offending
    /// arrays are reported together.
    pub fn validate(&self, num_vials: usize) -> Result<()> {
        let n = self.base.vials.len();
        let mut fields = self.base.mismatched_fields();
        let required = [
            ("start_od", self.start_od.len()),
            ("bolus volumes", self.bolus.len()),
            ("dilution rates", self.rates.len()),
            ("pump_ratios", self.pump_ratios.len()),
        ];
        fields.extend(required.into_iter().filter(|&(_, len)| len != n).map(|(name, _)| name));
        let optional = [
            ("target_od", self.target_od.len()),
            ("dilution_steps", self.dilution_steps.len()),
        ];
        fields.extend(
            optional
                .into_iter()
                .filter(|&(_, len)| len != 0 && len != n)
                .map(|(name, _)| name),
        );
        if !fields.is_empty() {
            return Err(ConfigurationError::VialCountMismatch { fields }.into());
        }
        if self.target_od.is_empty() != self.dilution_steps.is_empty() {
            return Err(ConfigurationError::Invalid(
                "target_od and dilution_steps must be given together".into(),
            )
            .into());
        }
        for ratio in &self.pump_ratios {
            ratio.fractions()?;
        }
        self.base.validate_scalars(num_vials)
    }

    fn planner_target(&self, i: usize) -> Option<(f64, u32)> {
        Some((*self.target_od.get(i)?, *self.dilution_steps.get(i)?))
    }
}

// ───────────────────────────────────────────────────────────────
// Chemostat
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VialState {
    /// Waiting for a full OD window.
    AwaitingFirstOd,
    Active,
    UpdatedThisTick,
    /// Past its end time.
    Ended,
}

pub struct Chemostat {
    core: ReactorCore,
    settings: ChemostatSettings,
    planner: PlannerParams,
    states: BTreeMap<usize, VialState>,
    /// Smoothed OD at activation, the planner's series start.
    reference_od: BTreeMap<usize, f64>,
}

impl Chemostat {
    /// Validates every per-vial array, then fits each (bolus, rate) to the
    /// pump limits.  Fails without sending anything.
    pub fn new(
        name: &str,
        mut settings: ChemostatSettings,
        calibrations: &CalibrationSet,
        controls: &Controls,
    ) -> Result<Self> {
        let config = controls.config();
        settings.validate(config.num_vials)?;

        let limits = config.pump_limits();
        for i in 0..settings.base.vials.len() {
            let (bolus, rate) = (settings.bolus[i], settings.rates[i]);
            if rate <= 0.0 || bolus <= 0.0 {
                settings.bolus[i] = 0.0;
                settings.rates[i] = 0.0;
                continue;
            }
            let clamp = clamp_bolus_rate(&limits, bolus, rate, settings.base.volume_ml, ClampMode::Adjust)?;
            if clamp.adjusted {
                settings.bolus[i] = clamp.bolus_ml;
                settings.rates[i] = clamp.rate;
            }
        }

        let core = ReactorCore::new(name, settings.base.clone(), calibrations, config)?;
        let states = settings
            .base
            .vials
            .iter()
            .map(|&v| (v, VialState::AwaitingFirstOd))
            .collect();
        Ok(Self {
            core,
            settings,
            planner: config.planner_params(),
            states,
            reference_od: BTreeMap::new(),
        })
    }

    pub fn core(&self) -> &ReactorCore {
        &self.core
    }

    pub fn settings(&self) -> &ChemostatSettings {
        &self.settings
    }

    pub fn state(&self, vial: usize) -> Option<VialState> {
        self.states.get(&vial).copied()
    }

    /// Configured (bolus, rate) of `vial` after the construction clamp.
    pub fn pump_settings(&self, vial: usize) -> Option<(f64, f64)> {
        let i = self.core.vials().iter().position(|&v| v == vial)?;
        Some((self.settings.bolus[i], self.settings.rates[i]))
    }

    fn set_state(&mut self, vial: usize, state: VialState) {
        self.states.insert(vial, state);
    }

    /// Reset per-tick marks.  Returns false if every live vial was
    /// already updated, meaning the tick can be skipped.
    fn begin_tick(&mut self) -> bool {
        let mut live = self.states.values().filter(|s| **s != VialState::Ended).peekable();
        if live.peek().is_none() || live.all(|s| *s == VialState::UpdatedThisTick) {
            return false;
        }
        for state in self.states.values_mut() {
            if *state == VialState::UpdatedThisTick {
                *state = VialState::Active;
            }
        }
        true
    }

    /// Bolus for this tick: planner output when a target is set.
    fn bolus_for(&self, i: usize, vial: usize, od: f64) -> f64 {
        let configured = self.settings.bolus[i];
        let Some((target_od, steps)) = self.settings.planner_target(i) else {
            return configured;
        };
        let reference = self.reference_od.get(&vial).copied().unwrap_or(od);
        compute_bolus_volume(
            &self.planner,
            od,
            reference,
            target_od,
            steps,
            self.core.volume_ml(),
        )
    }
}

impl Reactor for Chemostat {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn vials(&self) -> &[usize] {
        self.core.vials()
    }

    fn start(&mut self, controls: &mut Controls, sink: &mut dyn CommandSink) -> Result<()> {
        self.core.start(controls, sink)
    }

    fn update(
        &mut self,
        controls: &mut Controls,
        sink: &mut dyn CommandSink,
        broadcast: &Broadcast,
    ) -> Result<UpdateMsg> {
        let pre = self.core.pre_update(controls, sink, broadcast)?;
        let time = pre.time;
        let mut records = pre.records;

        if !pre.started {
            return Ok(self.core.update_msg(None, records));
        }

        for vial in self.core.vials().to_vec() {
            if self.core.has_ended(vial) {
                self.set_state(vial, VialState::Ended);
            }
        }

        if !self.begin_tick() {
            debug!("reactor '{}': all chemostat vials updated, skipping checks", self.core.name());
            return Ok(self.core.update_msg(Some(time), records));
        }

        let limits = controls.config().pump_limits();
        let volume = self.core.volume_ml();
        let mut batch = Vec::new();

        for (i, vial) in self.core.vials().to_vec().into_iter().enumerate() {
            let state = self.state(vial).unwrap_or(VialState::AwaitingFirstOd);
            if matches!(state, VialState::Ended | VialState::UpdatedThisTick) {
                continue;
            }
            if !self.core.is_running(vial, time) {
                continue;
            }
            let Some((full, od)) = self.core.sensors().od_history(vial).map(|h| (h.is_full(), h.median())) else {
                continue;
            };
            if state == VialState::AwaitingFirstOd {
                if !full {
                    debug!("vial {vial}: not enough OD measurements to start");
                    continue;
                }
                self.set_state(vial, VialState::Active);
            }

            if !(od.is_finite() && od >= self.settings.start_od[i]) {
                continue;
            }
            self.reference_od.entry(vial).or_insert(od);

            let bolus = self.bolus_for(i, vial, od);
            let rate = self.settings.rates[i];
            if !(bolus > 0.0 && rate > 0.0) {
                debug!("vial {vial}: on target, no dilution");
                self.set_state(vial, VialState::UpdatedThisTick);
                records.push(VialRecord::Hold { vial });
                continue;
            }

            let clamp = match clamp_bolus_rate(&limits, bolus, rate, volume, ClampMode::Adjust) {
                Ok(c) => c,
                Err(e) => {
                    warn!("vial {vial}: {e}; deferring");
                    continue;
                }
            };
            let flows = match self.core.fits(vial).and_then(|f| f.flows()) {
                Ok(f) => f,
                Err(e) => {
                    warn!("vial {vial}: no usable pump calibration ({e}); deferring");
                    continue;
                }
            };
            batch.push(RepeatDilution {
                vial,
                bolus_ml: clamp.bolus_ml,
                rate: clamp.rate,
                ratio: self.settings.pump_ratios[i],
                flows,
                volume_ml: volume,
            });
        }

        if !batch.is_empty() {
            let outcomes = controls.dilute_repeat(sink, &batch)?;
            for (vial, out) in outcomes {
                if !out.is_active() {
                    continue;
                }
                info!(
                    "chemostat initiated for vial {vial}, period {:.1}s, bolus {:.2} mL",
                    out.period_secs, out.bolus_ml
                );
                records.push(VialRecord::Recurrent {
                    vial,
                    in1: (out.secs.in1, out.period_secs),
                    in2: (out.secs.in2, out.period_secs),
                    out: (out.secs.out, out.period_secs),
                });
                self.set_state(vial, VialState::UpdatedThisTick);
            }
        }

        Ok(self.core.update_msg(Some(time), records))
    }

    fn replace_calibrations(&mut self, calibrations: &CalibrationSet) -> Result<()> {
        self.core.replace_calibrations(calibrations)
    }

    fn stop(&mut self, controls: &mut Controls, sink: &mut dyn CommandSink) -> Result<()> {
        self.core.stop(controls, sink)?;
        for state in self.states.values_mut() {
            *state = VialState::Ended;
        }
        Ok(())
    }
}
