//! Integration tests for the fluidics controls and the lock protocol.

use vialctl::Error;
use vialctl::app::controls::{BolusRequest, Controls, RepeatDilution};
use vialctl::config::ControlConfig;
use vialctl::control::ratio::PumpRatio;
use vialctl::error::ConfigurationError;
use vialctl::rpc::command::{Command, PumpChannel, PumpValue};

use super::mock_link::MockLink;

const FLOWS: [f64; 3] = [1.0, 1.0, 1.0];

fn controls(num_vials: usize) -> Controls {
    Controls::new(ControlConfig {
        num_vials,
        ..ControlConfig::default()
    })
    .unwrap()
}

fn program(vial: usize) -> RepeatDilution {
    RepeatDilution {
        vial,
        bolus_ml: 1.0,
        rate: 1.0,
        ratio: PumpRatio::default(),
        flows: FLOWS,
        volume_ml: 30.0,
    }
}

fn bolus(vial: usize, bolus_ml: f64) -> BolusRequest {
    BolusRequest {
        vial,
        bolus_ml,
        ratio: PumpRatio::default(),
        flows: FLOWS,
    }
}

// ── Standing programs ─────────────────────────────────────────

#[test]
fn repeat_dilution_sends_one_recurring_command() {
    let mut c = controls(2);
    let mut link = MockLink::new();

    let outcomes = c.dilute_repeat(&mut link, &[program(0), program(1)]).unwrap();

    let pumps = link.pump_commands();
    assert_eq!(pumps.len(), 1, "both vials travel in one command");
    let (values, recurring, immediate) = pumps[0];
    assert!(recurring && !immediate);
    assert_eq!(
        values.get(0, PumpChannel::In1),
        Some(PumpValue::Recurring { secs: 1.0, period: 3600.0 })
    );
    // Efflux carries the outflow margin on top of the bolus.
    assert_eq!(
        values.get(1, PumpChannel::Out),
        Some(PumpValue::Recurring { secs: 6.0, period: 3600.0 })
    );
    assert_eq!(values.get(0, PumpChannel::In2), Some(PumpValue::NoChange));
    assert!(outcomes.values().all(|o| o.is_active() && !o.adjusted));
    assert_eq!(c.recurring_cache().len(), 4);
}

#[test]
fn unsafe_program_is_adjusted_not_rejected() {
    let mut c = controls(1);
    let mut link = MockLink::new();
    let fast = RepeatDilution {
        bolus_ml: 0.4,
        rate: 60.0, // one pulse a minute, below the 120 s minimum
        ..program(0)
    };

    let outcome = c.dilute_repeat(&mut link, &[fast]).unwrap()[&0];

    assert!(outcome.adjusted);
    assert!(outcome.period_secs >= 120.0 - 1e-9);
    assert!((outcome.bolus_ml * outcome.rate - 24.0).abs() < 1e-6, "throughput kept");
    assert!((outcome.bolus_ml - 0.8).abs() < 1e-9);
}

// ── Lock protocol ─────────────────────────────────────────────

#[test]
fn lock_suspends_and_unlock_restores_programs() {
    let mut c = controls(2);
    let mut link = MockLink::new();
    c.dilute_repeat(&mut link, &[program(0)]).unwrap();
    let before = c.recurring_cache().clone();
    link.clear();

    c.lock(&mut link).unwrap();
    assert!(c.is_locked());
    let pumps = link.pump_commands();
    assert_eq!(pumps.len(), 1);
    let (stop, recurring, immediate) = pumps[0];
    assert!(!recurring && immediate);
    assert_eq!(stop.get(0, PumpChannel::In1), Some(PumpValue::Stop));
    assert_eq!(stop.get(0, PumpChannel::Out), Some(PumpValue::Stop));
    assert!(c.recurring_cache().is_empty());
    assert_eq!(c.suspended_programs().len(), 2);
    link.clear();

    c.unlock(&mut link).unwrap();
    assert!(!c.is_locked());
    let pumps = link.pump_commands();
    assert_eq!(pumps.len(), 1, "no backlog, only the restored programs");
    let (restored, recurring, _) = pumps[0];
    assert!(recurring);
    assert_eq!(
        restored.get(0, PumpChannel::In1),
        Some(PumpValue::Recurring { secs: 1.0, period: 3600.0 })
    );
    assert_eq!(c.recurring_cache(), &before);
}

#[test]
fn second_lock_sends_nothing() {
    let mut c = controls(1);
    let mut link = MockLink::new();
    c.dilute_repeat(&mut link, &[program(0)]).unwrap();
    c.lock(&mut link).unwrap();
    link.clear();

    c.lock(&mut link).unwrap();

    assert!(link.sent.is_empty());
    assert_eq!(c.suspended_programs().len(), 2);
}

#[test]
fn locked_boluses_merge_into_one_command_at_unlock() {
    let mut c = controls(2);
    let mut link = MockLink::new();
    c.lock(&mut link).unwrap();

    c.dilute_bolus(&mut link, &[bolus(1, 2.0)]).unwrap();
    c.dilute_bolus(&mut link, &[bolus(1, 3.0)]).unwrap();
    assert!(link.pump_commands().is_empty(), "nothing pumps while locked");
    assert_eq!(c.backlog().get(1, PumpChannel::In1), Some(5.0));
    assert_eq!(c.backlog().get(1, PumpChannel::Out), Some(15.0));

    c.unlock(&mut link).unwrap();

    let pumps = link.pump_commands();
    assert_eq!(pumps.len(), 1);
    let (flush, recurring, _) = pumps[0];
    assert!(!recurring);
    assert_eq!(flush.get(1, PumpChannel::In1), Some(PumpValue::Seconds(5.0)));
    assert_eq!(flush.get(1, PumpChannel::Out), Some(PumpValue::Seconds(15.0)));
    assert!(c.backlog().is_empty());
}

#[test]
fn stopping_a_locked_vial_keeps_it_stopped_after_unlock() {
    let mut c = controls(2);
    let mut link = MockLink::new();
    c.dilute_repeat(&mut link, &[program(0), program(1)]).unwrap();
    c.lock(&mut link).unwrap();
    c.dilute_bolus(&mut link, &[bolus(0, 1.0)]).unwrap();

    c.stop_pumps(&mut link, &[0], &[PumpChannel::In1, PumpChannel::In2, PumpChannel::Out])
        .unwrap();
    link.clear();
    c.unlock(&mut link).unwrap();

    let pumps = link.pump_commands();
    assert_eq!(pumps.len(), 1, "vial 0's backlog was cancelled");
    let (restored, _, _) = pumps[0];
    assert_eq!(restored.get(0, PumpChannel::In1), Some(PumpValue::NoChange));
    assert!(restored.get(1, PumpChannel::In1).is_some_and(|v| v.is_recurring()));
}

#[test]
fn repeat_while_locked_replaces_suspended_program() {
    let mut c = controls(1);
    let mut link = MockLink::new();
    c.dilute_repeat(&mut link, &[program(0)]).unwrap();
    c.lock(&mut link).unwrap();
    link.clear();

    let slower = RepeatDilution {
        rate: 0.5,
        ..program(0)
    };
    c.dilute_repeat(&mut link, &[slower]).unwrap();
    assert!(link.sent.is_empty());

    c.unlock(&mut link).unwrap();
    let (restored, _, _) = link.pump_commands()[0];
    assert_eq!(
        restored.get(0, PumpChannel::In1),
        Some(PumpValue::Recurring { secs: 1.0, period: 7200.0 })
    );
}

// ── One-shot limits ───────────────────────────────────────────

#[test]
fn one_shot_bolus_shrinks_to_fit_pump_time() {
    let mut c = controls(1);
    let mut link = MockLink::new();

    let outcome = c.dilute_bolus(&mut link, &[bolus(0, 15.0)]).unwrap()[&0];

    assert_eq!(outcome.bolus_ml, 13.0, "20 s efflux would exceed pump_time_max");
    assert_eq!(outcome.secs.in1, 13.0);
    assert_eq!(outcome.secs.out, 18.0);
    let (values, _, _) = link.pump_commands()[0];
    assert_eq!(values.get(0, PumpChannel::In1), Some(PumpValue::Seconds(13.0)));
    assert_eq!(values.get(0, PumpChannel::Out), Some(PumpValue::Seconds(18.0)));
}

#[test]
fn slow_outflow_pump_never_lets_vessel_fill() {
    let mut c = controls(1);
    let mut link = MockLink::new();
    let flows = [1.0, 1.0, 0.5];
    let req = BolusRequest { flows, ..bolus(0, 10.0) };

    let outcome = c.dilute_bolus(&mut link, &[req]).unwrap()[&0];

    let in_ml = outcome.secs.in1 * flows[0] + outcome.secs.in2 * flows[1];
    let out_ml = outcome.secs.out * flows[2];
    assert!(out_ml > in_ml, "vessel gains volume: in {in_ml} mL, out {out_ml} mL");
    assert!(outcome.secs.out <= 18.0 + 1e-9);
}

#[test]
fn backlog_beyond_pump_time_is_split_not_truncated() {
    let mut c = controls(1);
    let mut link = MockLink::new();
    c.lock(&mut link).unwrap();
    c.dilute_bolus(&mut link, &[bolus(0, 10.0)]).unwrap();
    c.dilute_bolus(&mut link, &[bolus(0, 10.0)]).unwrap();
    assert_eq!(c.backlog().get(0, PumpChannel::In1), Some(20.0));

    c.unlock(&mut link).unwrap();

    let pumps = link.pump_commands();
    assert!(pumps.len() > 1, "20 s of influx needs more than one pulse");
    let flushed: f64 = pumps
        .iter()
        .map(|(v, recurring, _)| {
            assert!(!recurring);
            v.get(0, PumpChannel::In1).map_or(0.0, |p| p.secs())
        })
        .sum();
    assert!((flushed - 20.0).abs() < 1e-9, "flushed {flushed} s of 20 s");
    assert!(pumps.iter().all(|(v, _, _)| v.values().iter().all(|p| p.secs() <= 18.0 + 1e-9)));
}

#[test]
fn out_of_range_vial_sends_nothing() {
    let mut c = controls(2);
    let mut link = MockLink::new();

    let err = c.dilute_bolus(&mut link, &[bolus(5, 1.0)]).unwrap_err();

    assert!(matches!(
        err,
        Error::Configuration(ConfigurationError::VialOutOfRange { vial: 5, num_vials: 2 })
    ));
    assert!(link.sent.is_empty());
}

// ── Setpoints ─────────────────────────────────────────────────

#[test]
fn stir_update_touches_only_listed_vials() {
    let mut c = controls(4);
    let mut link = MockLink::new();

    c.update_stir_rate(&mut link, &[1, 3], &[8.0, 10.0], true).unwrap();

    let Some(Command::Stir(v)) = link.sent.first() else {
        panic!("expected a stir command, got {:?}", link.sent);
    };
    assert!(v.immediate);
    assert_eq!(v.get(0), None);
    assert_eq!(v.get(1), Some(8.0));
    assert_eq!(v.get(3), Some(10.0));
}
