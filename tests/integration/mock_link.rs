//! Mock device link for integration tests.
//!
//! Records every command so tests can assert on the full history, and
//! serves scripted inbound messages.  A responder closure can answer
//! queries the way the device would.

use std::collections::VecDeque;
use std::sync::Arc;

use core::time::Duration;

use vialctl::app::controls::Controls;
use vialctl::app::events::AppEvent;
use vialctl::app::ports::{Clock, CommandSink, EventSink, InboundSource};
use vialctl::app::service::AppService;
use vialctl::calibration::CurveRef;
use vialctl::calibration::constant::Constant;
use vialctl::calibration::linear::Linear;
use vialctl::calibration::set::CalibrationSet;
use vialctl::config::ControlConfig;
use vialctl::control::ratio::PumpRatio;
use vialctl::reactors::ReactorSettings;
use vialctl::reactors::chemostat::{Chemostat, ChemostatSettings};
use vialctl::rpc::command::{Command, PumpCommandVector};
use vialctl::rpc::inbound::{Broadcast, Inbound, WireValue};

// ── MockLink ──────────────────────────────────────────────────

type Responder = Box<dyn FnMut(&Command) -> Option<Inbound>>;

pub struct MockLink {
    pub sent: Vec<Command>,
    pub inbound: VecDeque<Inbound>,
    pub flushes: usize,
    responder: Option<Responder>,
}

#[allow(dead_code)]
impl MockLink {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            inbound: VecDeque::new(),
            flushes: 0,
            responder: None,
        }
    }

    pub fn with_responder(responder: impl FnMut(&Command) -> Option<Inbound> + 'static) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    pub fn push(&mut self, msg: Inbound) {
        self.inbound.push_back(msg);
    }

    /// Pump vectors sent so far, with their recurring/immediate flags.
    pub fn pump_commands(&self) -> Vec<(&PumpCommandVector, bool, bool)> {
        self.sent
            .iter()
            .filter_map(|c| match c {
                Command::Pump {
                    values,
                    recurring,
                    immediate,
                } => Some((values, *recurring, *immediate)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSink for MockLink {
    fn submit(&mut self, cmd: Command) -> vialctl::Result<()> {
        if let Some(reply) = self.responder.as_mut().and_then(|r| r(&cmd)) {
            self.inbound.push_back(reply);
        }
        self.sent.push(cmd);
        Ok(())
    }

    fn flush(&mut self) -> vialctl::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

impl InboundSource for MockLink {
    fn poll(&mut self) -> vialctl::Result<Option<Inbound>> {
        Ok(self.inbound.pop_front())
    }
}

// ── FakeClock ─────────────────────────────────────────────────

/// Clock whose `sleep` only advances its own time.
#[derive(Default)]
pub struct FakeClock {
    pub now: f64,
    pub sleeps: usize,
}

impl Clock for FakeClock {
    fn now_secs(&self) -> f64 {
        self.now
    }

    fn sleep(&mut self, dur: Duration) {
        self.now += dur.as_secs_f64();
        self.sleeps += 1;
    }
}

// ── Event recorder ────────────────────────────────────────────

#[derive(Default)]
pub struct EventLog {
    pub events: Vec<AppEvent>,
}

impl EventSink for EventLog {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Fixtures ──────────────────────────────────────────────────

/// OD reads raw values directly, temperature is raw/100, every pump
/// moves 1 mL/s.
#[allow(dead_code)]
pub fn unit_calibrations(num_vials: usize) -> CalibrationSet {
    let pump: CurveRef = Arc::new(Constant::new(1.0));
    CalibrationSet::uniform(
        num_vials,
        "od_135",
        "temp",
        Arc::new(Linear::new(0.0, 1.0)),
        Arc::new(Linear::new(0.0, 0.01)),
        [pump.clone(), pump.clone(), pump],
    )
}

/// Broadcast with one OD and temperature reading per vial.
#[allow(dead_code)]
pub fn broadcast(timestamp: f64, od: &[f64], temp_raw: &[f64]) -> Inbound {
    let mut b = Broadcast {
        timestamp,
        ..Broadcast::default()
    };
    b.data
        .insert("od_135".into(), od.iter().map(|&v| WireValue::Number(v)).collect());
    b.data
        .insert("temp".into(), temp_raw.iter().map(|&v| WireValue::Number(v)).collect());
    Inbound::Broadcast(b)
}

#[allow(dead_code)]
pub fn controls(num_vials: usize) -> Controls {
    Controls::new(ControlConfig {
        num_vials,
        ..ControlConfig::default()
    })
    .unwrap()
}

/// Chemostat that starts at any OD: 0.5 mL twice per hour, all from IN1.
#[allow(dead_code)]
pub fn chemostat_settings(vials: &[usize]) -> ChemostatSettings {
    let n = vials.len();
    ChemostatSettings {
        base: ReactorSettings {
            vials: vials.to_vec(),
            volume_ml: 30.0,
            mem_len: 1,
            ..ReactorSettings::default()
        },
        start_od: vec![0.0; n],
        bolus: vec![0.5; n],
        rates: vec![0.5; n],
        pump_ratios: vec![PumpRatio::In1Fraction(1.0); n],
        target_od: Vec::new(),
        dilution_steps: Vec::new(),
    }
}

/// One-vial unit running one chemostat named `chemo`.
#[allow(dead_code)]
pub fn app_with(settings: ChemostatSettings, num_vials: usize) -> AppService {
    let mut app = AppService::new(controls(num_vials));
    let chemostat = Chemostat::new("chemo", settings, &unit_calibrations(num_vials), app.controls()).unwrap();
    app.register(Box::new(chemostat)).unwrap();
    app
}
