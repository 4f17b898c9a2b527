//! Application service — the hexagonal core.
//!
//! [`AppService`] owns the unit's [`Controls`] and every registered
//! reactor.  It exposes a clean, transport-agnostic API.  All I/O flows
//! through port traits injected at call sites, making the entire service
//! testable with in-memory sinks.
//!
//! ```text
//!  InboundSource ──▶ ┌────────────────────────┐ ──▶ EventSink
//!                    │       AppService        │
//!   CommandSink  ◀── │  Controls · Reactors    │
//!                    └────────────────────────┘
//! ```

use log::{error, info, warn};

use crate::calibration::set::CalibrationSet;
use crate::error::{ConfigurationError, Error, Result};
use crate::reactors::Reactor;
use crate::rpc::inbound::Inbound;

use super::commands::AppCommand;
use super::controls::Controls;
use super::events::AppEvent;
use super::ports::{Clock, CommandSink, EventSink, InboundSource};

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all domain logic.
pub struct AppService {
    controls: Controls,
    reactors: Vec<Box<dyn Reactor>>,
    started: bool,
    broadcasts: u64,
}

impl AppService {
    pub fn new(controls: Controls) -> Self {
        Self {
            controls,
            reactors: Vec::new(),
            started: false,
            broadcasts: 0,
        }
    }

    /// Add a reactor.  Vial sets of registered reactors must be disjoint.
    pub fn register(&mut self, reactor: Box<dyn Reactor>) -> Result<()> {
        for other in &self.reactors {
            if other.name() == reactor.name() {
                return Err(Error::config(format!("reactor name '{}' used twice", reactor.name())));
            }
            if let Some(v) = reactor.vials().iter().find(|v| other.vials().contains(v)) {
                return Err(ConfigurationError::Invalid(format!(
                    "vial {v} claimed by both '{}' and '{}'",
                    other.name(),
                    reactor.name()
                ))
                .into());
            }
        }
        info!("registered reactor '{}' on vials {:?}", reactor.name(), reactor.vials());
        self.reactors.push(reactor);
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Send every reactor's initial setpoints.
    pub fn start(&mut self, sink: &mut impl CommandSink, events: &mut impl EventSink) -> Result<()> {
        for reactor in &mut self.reactors {
            reactor.start(&mut self.controls, sink)?;
        }
        self.started = true;
        let reactors: Vec<String> = self.reactors.iter().map(|r| r.name().to_owned()).collect();
        info!("AppService started with reactors {:?}", reactors);
        events.emit(&AppEvent::Started { reactors });
        Ok(())
    }

    /// Fetch the device's active calibrations and build a set from them.
    pub fn fetch_calibrations<L, C>(&mut self, link: &mut L, clock: &mut C) -> Result<CalibrationSet>
    where
        L: CommandSink + InboundSource + ?Sized,
        C: Clock + ?Sized,
    {
        let active = self.controls.request_active_calibrations(link, clock)?;
        if !active.is_complete() {
            warn!("device reports an incomplete set of active calibrations");
        }
        CalibrationSet::from_active(&active, self.controls.num_vials())
    }

    // ── Per-broadcast orchestration ───────────────────────────

    /// Store an inbound message; on a broadcast, run every reactor.
    ///
    /// A failing reactor is reported and skipped; the others still run.
    pub fn handle_inbound(
        &mut self,
        msg: Inbound,
        sink: &mut impl CommandSink,
        events: &mut impl EventSink,
    ) -> Result<()> {
        let Some(broadcast) = self.controls.handle_inbound(msg) else {
            return Ok(());
        };
        if !self.started {
            warn!("broadcast before start, reactors not run");
            return Ok(());
        }
        self.broadcasts += 1;

        for reactor in &mut self.reactors {
            match reactor.update(&mut self.controls, sink, &broadcast) {
                Ok(update) => events.emit(&AppEvent::ReactorUpdated {
                    reactor: reactor.name().to_owned(),
                    update,
                }),
                Err(e) => {
                    error!("reactor '{}' update failed: {}", reactor.name(), e);
                    events.emit(&AppEvent::ReactorFailed {
                        reactor: reactor.name().to_owned(),
                        error: e.to_string(),
                    });
                }
            }
        }
        sink.flush()
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an operator command.
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        sink: &mut impl CommandSink,
        events: &mut impl EventSink,
    ) -> Result<()> {
        match cmd {
            AppCommand::Lock => {
                self.controls.lock(sink)?;
                events.emit(&AppEvent::Locked);
            }
            AppCommand::Unlock => {
                self.controls.unlock(sink)?;
                events.emit(&AppEvent::Unlocked);
            }
            AppCommand::StopAllPumps => {
                self.controls.stop_all_pumps(sink)?;
                events.emit(&AppEvent::PumpsStopped);
            }
            AppCommand::ReplaceCalibrations(set) => {
                if set.num_vials() != self.controls.num_vials() {
                    return Err(Error::config(format!(
                        "calibration set covers {} vials, unit has {}",
                        set.num_vials(),
                        self.controls.num_vials()
                    )));
                }
                for reactor in &mut self.reactors {
                    reactor.replace_calibrations(&set)?;
                }
                events.emit(&AppEvent::CalibrationsReplaced);
            }
            AppCommand::EndExperiment => {
                for reactor in &mut self.reactors {
                    reactor.stop(&mut self.controls, sink)?;
                }
                info!("experiment ended");
                events.emit(&AppEvent::ExperimentEnded);
            }
        }
        sink.flush()
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut Controls {
        &mut self.controls
    }

    pub fn reactors(&self) -> impl Iterator<Item = &dyn Reactor> + '_ {
        self.reactors.iter().map(|r| r.as_ref())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Broadcasts handed to the reactors since start.
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts
    }
}
