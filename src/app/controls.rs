//! Actuator coordination for one physical unit.
//!
//! [`Controls`] owns the live sensor snapshot, the lock state, the
//! recurring-command cache and the paused-dilution backlog.  Every
//! controller targeting the unit goes through it, so per-vial requests
//! are merged into unit-wide pump vectors instead of overwriting each
//! other on the wire.
//!
//! ```text
//!              lock()                        unlock()
//!  UNLOCKED ──────────────▶ LOCKED ──────────────────────▶ UNLOCKED
//!   │ one-shot → sent          │ one-shot → backlog (summed)   │ resend standing programs
//!   │ repeat   → sent + cache  │ repeat   → suspended          │ flush backlog once
//! ```
//!
//! Outflow always runs for the inflow volume plus `outflow_extra_ml`, so
//! the vessel volume never increases.

use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::calibration::set::{ActiveCalibrations, CalibrationRecord, ChannelFlows};
use crate::config::ControlConfig;
use crate::control::dilution::compute_bolus_volume;
use crate::control::ratio::PumpRatio;
use crate::error::{ConfigurationError, Error, Result};
use crate::rpc::command::{
    Command, PUMP_CHANNELS, PumpChannel, PumpCommandVector, PumpValue, SetpointParam,
};
use crate::rpc::inbound::{Broadcast, CalibrationDocument, CalibrationName, Inbound, config_keys};
use crate::safety::{ClampMode, clamp_bolus_rate};

use super::cache::{PausedDilutionBacklog, RecurringCommandCache, RecurringProgram};
use super::ports::{Clock, CommandSink, InboundSource};

// ───────────────────────────────────────────────────────────────
// Requests and outcomes
// ───────────────────────────────────────────────────────────────

/// A one-shot bolus of known volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BolusRequest {
    pub vial: usize,
    pub bolus_ml: f64,
    pub ratio: PumpRatio,
    pub flows: ChannelFlows,
}

/// A one-shot bolus sized by the serial-dilution planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleDilution {
    pub vial: usize,
    pub current_od: f64,
    pub starting_od: f64,
    pub target_od: f64,
    pub steps: u32,
    pub ratio: PumpRatio,
    pub flows: ChannelFlows,
    pub volume_ml: f64,
}

/// A standing program: `bolus_ml` delivered `rate` times per unit time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepeatDilution {
    pub vial: usize,
    pub bolus_ml: f64,
    pub rate: f64,
    pub ratio: PumpRatio,
    pub flows: ChannelFlows,
    pub volume_ml: f64,
}

/// Pump run time per channel, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelSeconds {
    pub in1: f64,
    pub in2: f64,
    pub out: f64,
}

impl ChannelSeconds {
    pub const ZERO: Self = Self {
        in1: 0.0,
        in2: 0.0,
        out: 0.0,
    };

    pub fn get(&self, channel: PumpChannel) -> f64 {
        match channel {
            PumpChannel::In1 => self.in1,
            PumpChannel::In2 => self.in2,
            PumpChannel::Out => self.out,
        }
    }

    fn set(&mut self, channel: PumpChannel, secs: f64) {
        match channel {
            PumpChannel::In1 => self.in1 = secs,
            PumpChannel::In2 => self.in2 = secs,
            PumpChannel::Out => self.out = secs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleOutcome {
    pub bolus_ml: f64,
    pub secs: ChannelSeconds,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepeatOutcome {
    pub bolus_ml: f64,
    pub rate: f64,
    /// The safety clamp changed the requested bolus or rate.
    pub adjusted: bool,
    pub secs: ChannelSeconds,
    pub period_secs: f64,
}

impl RepeatOutcome {
    fn idle() -> Self {
        Self {
            bolus_ml: 0.0,
            rate: 0.0,
            adjusted: false,
            secs: ChannelSeconds::ZERO,
            period_secs: 0.0,
        }
    }

    /// True if a program was actually scheduled.
    pub fn is_active(&self) -> bool {
        self.rate > 0.0 && self.bolus_ml > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingQuery {
    ActiveCalibrations,
    Calibration,
    CalibrationNames,
}

// ───────────────────────────────────────────────────────────────
// Controls
// ───────────────────────────────────────────────────────────────

pub struct Controls {
    config: ControlConfig,
    locked: bool,
    snapshot: Option<Arc<Broadcast>>,
    recurring: RecurringCommandCache,
    /// Standing programs stopped by `lock()`, restarted by `unlock()`.
    suspended: RecurringCommandCache,
    backlog: PausedDilutionBacklog,
    awaiting: Option<PendingQuery>,
    active_calibrations: Option<ActiveCalibrations>,
    calibration: Option<CalibrationDocument>,
    calibration_names: Option<Vec<CalibrationName>>,
}

impl Controls {
    pub fn new(config: ControlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            locked: false,
            snapshot: None,
            recurring: RecurringCommandCache::new(),
            suspended: RecurringCommandCache::new(),
            backlog: PausedDilutionBacklog::new(),
            awaiting: None,
            active_calibrations: None,
            calibration: None,
            calibration_names: None,
        })
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn num_vials(&self) -> usize {
        self.config.num_vials
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Latest broadcast, replaced wholesale on every arrival.
    pub fn snapshot(&self) -> Option<&Arc<Broadcast>> {
        self.snapshot.as_ref()
    }

    pub fn last_broadcast_time(&self) -> Option<f64> {
        self.snapshot.as_ref().map(|b| b.timestamp)
    }

    pub fn recurring_cache(&self) -> &RecurringCommandCache {
        &self.recurring
    }

    pub fn suspended_programs(&self) -> &RecurringCommandCache {
        &self.suspended
    }

    pub fn backlog(&self) -> &PausedDilutionBacklog {
        &self.backlog
    }

    /// Device-reported LED power per vial.
    pub fn led_power_config(&self) -> Vec<f64> {
        self.echoed(config_keys::LED)
    }

    /// Device-reported stir rate per vial.
    pub fn stir_rate_config(&self) -> Vec<f64> {
        self.echoed(config_keys::STIR)
    }

    /// Device-reported raw temperature setpoint per vial.
    pub fn temp_setpoint_config(&self) -> Vec<f64> {
        self.echoed(config_keys::TEMP)
    }

    fn echoed(&self, key: &str) -> Vec<f64> {
        self.snapshot.as_ref().map(|b| b.config_values(key)).unwrap_or_default()
    }

    pub fn active_calibrations(&self) -> Option<&ActiveCalibrations> {
        self.active_calibrations.as_ref()
    }

    pub fn calibration(&self) -> Option<&CalibrationDocument> {
        self.calibration.as_ref()
    }

    pub fn calibration_names(&self) -> Option<&[CalibrationName]> {
        self.calibration_names.as_deref()
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Store an inbound message.  Returns the broadcast, if it was one,
    /// so the caller can run its controllers on it.
    pub fn handle_inbound(&mut self, msg: Inbound) -> Option<Arc<Broadcast>> {
        match msg {
            Inbound::Broadcast(b) => {
                debug!("broadcast received (t={:.1})", b.timestamp);
                let b = Arc::new(b);
                self.snapshot = Some(Arc::clone(&b));
                return Some(b);
            }
            Inbound::ActiveCalibrations(list) => {
                self.active_calibrations = Some(ActiveCalibrations::from_sensor_calibrations(&list));
                self.answered(PendingQuery::ActiveCalibrations);
            }
            Inbound::Calibration(doc) => {
                self.calibration = Some(doc);
                self.answered(PendingQuery::Calibration);
            }
            Inbound::CalibrationNames(names) => {
                self.calibration_names = Some(names);
                self.answered(PendingQuery::CalibrationNames);
            }
        }
        None
    }

    fn answered(&mut self, kind: PendingQuery) {
        if self.awaiting == Some(kind) {
            self.awaiting = None;
        }
    }

    // ── Lock protocol ─────────────────────────────────────────

    /// Stop every standing program and start queueing requests.
    ///
    /// Programs known to the cache, plus any the latest broadcast echoes,
    /// are stopped with one immediate command and kept for `unlock()`.
    /// A second call while locked does nothing.
    pub fn lock<S: CommandSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if self.locked {
            debug!("lock requested while already locked");
            return Ok(());
        }
        let n = self.config.num_vials;
        let mut standing = self.recurring.clone();
        if let Some(b) = &self.snapshot {
            for (i, value) in b.pump_values().into_iter().enumerate() {
                let PumpValue::Recurring { secs, period } = value else {
                    continue;
                };
                let Some(ch) = PumpChannel::from_index(i / n) else {
                    continue;
                };
                if !standing.contains(i % n, ch) {
                    standing.insert(i % n, ch, RecurringProgram { secs, period });
                }
            }
        }

        if standing.is_empty() {
            info!("locked pumps (no standing programs)");
        } else {
            let mut stop = PumpCommandVector::new(n);
            for (vial, ch, _) in standing.iter() {
                stop.set(vial, ch, PumpValue::Stop)?;
            }
            sink.submit(Command::pump(stop, false, true)?)?;
            info!(
                "locked pumps, suspended {} standing programs on vials {:?}",
                standing.len(),
                standing.vials()
            );
        }

        self.recurring.clear();
        self.suspended = standing;
        self.locked = true;
        Ok(())
    }

    /// Restart suspended programs, then flush the backlog as one command.
    pub fn unlock<S: CommandSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if !self.locked {
            debug!("unlock requested while unlocked");
            return Ok(());
        }
        let n = self.config.num_vials;

        if !self.suspended.is_empty() {
            let programs = self.suspended.to_vector(n)?;
            sink.submit(Command::pump(programs, true, false)?)?;
            info!("restored {} standing programs", self.suspended.len());
        }
        self.recurring = core::mem::take(&mut self.suspended);

        if !self.backlog.is_empty() {
            self.flush_backlog(sink)?;
            self.backlog.clear();
        }

        self.locked = false;
        Ok(())
    }

    // ── Fluidics ──────────────────────────────────────────────

    /// One-shot boluses of known volume, merged into one command (or the
    /// backlog while locked).
    pub fn dilute_bolus<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        requests: &[BolusRequest],
    ) -> Result<BTreeMap<usize, SingleOutcome>> {
        let mut planned = BTreeMap::new();
        for r in requests {
            self.check_vial(r.vial)?;
            if !(r.bolus_ml.is_finite() && r.bolus_ml > 0.0) {
                planned.insert(r.vial, SingleOutcome {
                    bolus_ml: 0.0,
                    secs: ChannelSeconds::ZERO,
                });
                continue;
            }
            let requested = r.bolus_ml.min(self.config.bolus_volume_max_ml);
            let (bolus_ml, secs) = self.fit_pump_time(r.vial, requested, r.ratio, &r.flows)?;
            planned.insert(r.vial, SingleOutcome { bolus_ml, secs });
        }
        self.dispatch_one_shot(sink, &planned)?;
        Ok(planned)
    }

    /// One-shot serial-dilution step per vial, sized by the planner.
    /// Vials already on target get a zero outcome and no pumping.
    pub fn dilute_single<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        requests: &[SingleDilution],
    ) -> Result<BTreeMap<usize, SingleOutcome>> {
        let params = self.config.planner_params();
        let boluses: Vec<BolusRequest> = requests
            .iter()
            .map(|r| BolusRequest {
                vial: r.vial,
                bolus_ml: compute_bolus_volume(
                    &params,
                    r.current_od,
                    r.starting_od,
                    r.target_od,
                    r.steps,
                    r.volume_ml,
                ),
                ratio: r.ratio,
                flows: r.flows,
            })
            .collect();
        self.dilute_bolus(sink, &boluses)
    }

    /// Standing programs for a batch of vials, sent as one recurring
    /// command.  While locked they replace the suspended programs instead.
    pub fn dilute_repeat<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        requests: &[RepeatDilution],
    ) -> Result<BTreeMap<usize, RepeatOutcome>> {
        let limits = self.config.pump_limits();
        let mut outcomes = BTreeMap::new();
        let mut programs: Vec<(usize, PumpChannel, RecurringProgram)> = Vec::new();

        for r in requests {
            self.check_vial(r.vial)?;
            if !(r.rate > 0.0 && r.bolus_ml > 0.0) {
                outcomes.insert(r.vial, RepeatOutcome::idle());
                continue;
            }
            let clamp = clamp_bolus_rate(&limits, r.bolus_ml, r.rate, r.volume_ml, ClampMode::Adjust)?;
            let period = limits.period_secs(clamp.rate);
            let secs = self.channel_seconds(clamp.bolus_ml, r.ratio, &r.flows)?;
            for ch in PUMP_CHANNELS {
                let s = secs.get(ch);
                if s > 0.0 {
                    programs.push((r.vial, ch, RecurringProgram { secs: s, period }));
                }
            }
            outcomes.insert(r.vial, RepeatOutcome {
                bolus_ml: clamp.bolus_ml,
                rate: clamp.rate,
                adjusted: clamp.adjusted,
                secs,
                period_secs: period,
            });
        }

        if programs.is_empty() {
            return Ok(outcomes);
        }

        if self.locked {
            replace_programs(&mut self.suspended, &programs);
            debug!("locked: {} standing programs held until unlock", programs.len());
            return Ok(outcomes);
        }

        let mut vector = PumpCommandVector::new(self.config.num_vials);
        for &(vial, ch, p) in &programs {
            vector.set(vial, ch, p.value())?;
        }
        sink.submit(Command::pump(vector, true, false)?)?;
        replace_programs(&mut self.recurring, &programs);
        Ok(outcomes)
    }

    /// Immediately stop the given channels of `vials`.  Also cancels any
    /// cached, suspended or queued work on them so an unlock cannot
    /// restart a stopped vial.
    pub fn stop_pumps<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        vials: &[usize],
        channels: &[PumpChannel],
    ) -> Result<()> {
        if vials.is_empty() || channels.is_empty() {
            return Ok(());
        }
        let mut stop = PumpCommandVector::new(self.config.num_vials);
        for &vial in vials {
            for &ch in channels {
                stop.set(vial, ch, PumpValue::Stop)?;
            }
        }
        info!("stopping {:?} pumps for vials {:?}", channels, vials);
        sink.submit(Command::pump(stop, false, true)?)?;
        for &vial in vials {
            for &ch in channels {
                self.recurring.remove(vial, ch);
                self.suspended.remove(vial, ch);
                self.backlog.remove(vial, ch);
            }
        }
        Ok(())
    }

    /// Stop every pump on the unit and forget all pending work.
    pub fn stop_all_pumps<S: CommandSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        info!("stopping all pumps");
        let stop = PumpCommandVector::stop_all(self.config.num_vials);
        sink.submit(Command::pump(stop, false, true)?)?;
        self.recurring.clear();
        self.suspended.clear();
        self.backlog.clear();
        Ok(())
    }

    // ── Setpoints ─────────────────────────────────────────────

    pub fn update_stir_rate<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        vials: &[usize],
        rates: &[f64],
        immediate: bool,
    ) -> Result<()> {
        self.send_setpoints(sink, SetpointParam::Stir, vials, rates, immediate)
    }

    /// `raw_setpoints` are device units, not °C.
    pub fn update_temperature<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        vials: &[usize],
        raw_setpoints: &[f64],
        immediate: bool,
    ) -> Result<()> {
        self.send_setpoints(sink, SetpointParam::Temperature, vials, raw_setpoints, immediate)
    }

    pub fn update_led_power<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        vials: &[usize],
        powers: &[f64],
        immediate: bool,
    ) -> Result<()> {
        self.send_setpoints(sink, SetpointParam::OdLed, vials, powers, immediate)
    }

    fn send_setpoints<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        param: SetpointParam,
        vials: &[usize],
        values: &[f64],
        immediate: bool,
    ) -> Result<()> {
        let cmd = Command::setpoints(param, self.config.num_vials, vials, values, immediate)?;
        debug!("changing {} on vials {:?} to {:?}", param.wire_name(), vials, values);
        sink.submit(cmd)
    }

    // ── Calibrations ──────────────────────────────────────────

    pub fn push_calibration_fit<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        name: &str,
        fit: CalibrationRecord,
    ) -> Result<()> {
        info!("pushing calibration fit '{}' as '{}'", fit.name, name);
        sink.submit(Command::SetFitCalibration {
            name: name.to_owned(),
            fit,
        })
    }

    /// Ask the device for its active calibrations and wait for the answer.
    pub fn request_active_calibrations<L, C>(&mut self, link: &mut L, clock: &mut C) -> Result<ActiveCalibrations>
    where
        L: CommandSink + InboundSource + ?Sized,
        C: Clock + ?Sized,
    {
        self.active_calibrations = None;
        self.query(link, clock, Command::GetActiveCalibrations, PendingQuery::ActiveCalibrations, "active calibrations")?;
        self.active_calibrations
            .clone()
            .ok_or_else(|| Error::Protocol("active calibrations answered without data".into()))
    }

    /// Fetch one calibration document by name.
    pub fn request_calibration<L, C>(&mut self, link: &mut L, clock: &mut C, name: &str) -> Result<CalibrationDocument>
    where
        L: CommandSink + InboundSource + ?Sized,
        C: Clock + ?Sized,
    {
        self.calibration = None;
        let cmd = Command::GetCalibration { name: name.to_owned() };
        self.query(link, clock, cmd, PendingQuery::Calibration, "calibration")?;
        self.calibration
            .clone()
            .ok_or_else(|| Error::Protocol("calibration answered without data".into()))
    }

    /// Names (and types) of every calibration stored on the device.
    pub fn request_calibration_names<L, C>(&mut self, link: &mut L, clock: &mut C) -> Result<Vec<CalibrationName>>
    where
        L: CommandSink + InboundSource + ?Sized,
        C: Clock + ?Sized,
    {
        self.calibration_names = None;
        self.query(link, clock, Command::GetCalibrationNames, PendingQuery::CalibrationNames, "calibration names")?;
        self.calibration_names
            .clone()
            .ok_or_else(|| Error::Protocol("calibration names answered without data".into()))
    }

    /// Send `cmd` and poll until the matching response arrives or the
    /// deadline passes.  Broadcasts seen meanwhile only refresh the snapshot.
    fn query<L, C>(
        &mut self,
        link: &mut L,
        clock: &mut C,
        cmd: Command,
        kind: PendingQuery,
        what: &'static str,
    ) -> Result<()>
    where
        L: CommandSink + InboundSource + ?Sized,
        C: Clock + ?Sized,
    {
        debug!("requesting {what}");
        link.submit(cmd)?;
        link.flush()?;
        self.awaiting = Some(kind);

        let timeout = self.config.calibration_timeout_ms as f64 / 1000.0;
        let poll = Duration::from_millis(self.config.calibration_poll_ms);
        let start = clock.now_secs();
        loop {
            while let Some(msg) = link.poll()? {
                self.handle_inbound(msg);
            }
            if self.awaiting.is_none() {
                debug!("{what} received");
                return Ok(());
            }
            let waited = clock.now_secs() - start;
            if waited >= timeout {
                self.awaiting = None;
                warn!("device did not answer {what} within {timeout:.1}s");
                return Err(Error::Timeout {
                    what,
                    waited_secs: waited,
                });
            }
            clock.sleep(poll);
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn check_vial(&self, vial: usize) -> Result<()> {
        if vial >= self.config.num_vials {
            return Err(ConfigurationError::VialOutOfRange {
                vial,
                num_vials: self.config.num_vials,
            }
            .into());
        }
        Ok(())
    }

    /// Seconds each channel must run to move `bolus_ml` split by `ratio`.
    fn channel_seconds(&self, bolus_ml: f64, ratio: PumpRatio, flows: &ChannelFlows) -> Result<ChannelSeconds> {
        let [f1, f2] = ratio.fractions()?;
        if let Some(bad) = flows.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
            return Err(Error::config(format!("pump flow rate {bad} mL/s is not positive")));
        }
        Ok(ChannelSeconds {
            in1: f1 * bolus_ml / flows[PumpChannel::In1.index()],
            in2: f2 * bolus_ml / flows[PumpChannel::In2.index()],
            out: (bolus_ml + self.config.outflow_extra_ml) / flows[PumpChannel::Out.index()],
        })
    }

    /// Shrink `bolus_ml` until no channel runs past `pump_time_max_secs`.
    /// Every channel is recomputed from the reduced bolus, so efflux still
    /// covers influx plus the outflow margin.
    fn fit_pump_time(
        &self,
        vial: usize,
        bolus_ml: f64,
        ratio: PumpRatio,
        flows: &ChannelFlows,
    ) -> Result<(f64, ChannelSeconds)> {
        let max = self.config.pump_time_max_secs;
        let secs = self.channel_seconds(bolus_ml, ratio, flows)?;
        if PUMP_CHANNELS.iter().all(|&ch| secs.get(ch) <= max) {
            return Ok((bolus_ml, secs));
        }

        let [f1, f2] = ratio.fractions()?;
        let mut fitted = max * flows[PumpChannel::Out.index()] - self.config.outflow_extra_ml;
        for (fraction, ch) in [(f1, PumpChannel::In1), (f2, PumpChannel::In2)] {
            if fraction > 0.0 {
                fitted = fitted.min(max * flows[ch.index()] / fraction);
            }
        }
        if fitted <= 0.0 {
            return Err(Error::config(format!(
                "vial {vial}: outflow margin of {:.2} mL does not fit in a {max:.2}s pulse",
                self.config.outflow_extra_ml
            )));
        }
        warn!("vial {vial}: bolus {bolus_ml:.2} mL cut to {fitted:.2} mL to keep every pump under {max:.2}s");

        let mut secs = self.channel_seconds(fitted, ratio, flows)?;
        for ch in PUMP_CHANNELS {
            secs.set(ch, secs.get(ch).min(max));
        }
        Ok((fitted, secs))
    }

    /// Send the backlog as one-shot pulses.  A vial whose longest channel
    /// exceeds `pump_time_max_secs` is split into equal pulses, each
    /// carrying the same share of every channel; the pulses sum to the
    /// queued seconds.
    fn flush_backlog<S: CommandSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        let max = self.config.pump_time_max_secs;
        let mut queued: BTreeMap<usize, ChannelSeconds> = BTreeMap::new();
        for (vial, ch, secs) in self.backlog.iter() {
            queued.entry(vial).or_insert(ChannelSeconds::ZERO).set(ch, secs);
        }
        let split: Vec<(usize, ChannelSeconds, usize)> = queued
            .into_iter()
            .map(|(vial, secs)| {
                let longest = PUMP_CHANNELS.iter().map(|&ch| secs.get(ch)).fold(0.0, f64::max);
                let pulses = ((longest / max).ceil() as usize).max(1);
                (vial, secs, pulses)
            })
            .collect();
        let rounds = split.iter().map(|&(_, _, p)| p).max().unwrap_or(0);

        for round in 0..rounds {
            let mut flush = PumpCommandVector::new(self.config.num_vials);
            for &(vial, secs, pulses) in split.iter().filter(|&&(_, _, p)| p > round) {
                for ch in PUMP_CHANNELS {
                    let s = secs.get(ch) / pulses as f64;
                    if s > 0.0 {
                        flush.set(vial, ch, PumpValue::Seconds(s))?;
                    }
                }
            }
            if !flush.is_empty() {
                sink.submit(Command::pump(flush, false, false)?)?;
            }
        }
        info!("flushed paused dilutions in {rounds} pulse(s)");
        Ok(())
    }

    fn dispatch_one_shot<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        planned: &BTreeMap<usize, SingleOutcome>,
    ) -> Result<()> {
        if self.locked {
            for (&vial, outcome) in planned {
                for ch in PUMP_CHANNELS {
                    let s = outcome.secs.get(ch);
                    if s > 0.0 {
                        self.backlog.add(vial, ch, s);
                    }
                }
            }
            debug!("locked: queued one-shot dilutions for vials {:?}", planned.keys().collect::<Vec<_>>());
            return Ok(());
        }

        let mut vector = PumpCommandVector::new(self.config.num_vials);
        for (&vial, outcome) in planned {
            for ch in PUMP_CHANNELS {
                let s = outcome.secs.get(ch);
                if s > 0.0 {
                    vector.set(vial, ch, PumpValue::Seconds(s))?;
                }
            }
        }
        if vector.is_empty() {
            return Ok(());
        }
        sink.submit(Command::pump(vector, false, false)?)
    }
}

/// New programs for a vial replace every channel it had before.
fn replace_programs(cache: &mut RecurringCommandCache, programs: &[(usize, PumpChannel, RecurringProgram)]) {
    for &(vial, _, _) in programs {
        cache.remove_vial(vial);
    }
    for &(vial, ch, p) in programs {
        cache.insert(vial, ch, p);
    }
}
