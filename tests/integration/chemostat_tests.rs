//! Integration tests: broadcast → AppService → Chemostat → pump commands.

use vialctl::Error;
use vialctl::app::commands::AppCommand;
use vialctl::app::events::{AppEvent, VialRecord};
use vialctl::error::ConfigurationError;
use vialctl::reactors::chemostat::{Chemostat, ChemostatSettings};
use vialctl::rpc::command::{Command, PumpChannel, PumpValue};

use super::mock_link::{EventLog, MockLink, app_with, broadcast, chemostat_settings, controls, unit_calibrations};

fn single_vial() -> ChemostatSettings {
    chemostat_settings(&[0])
}

fn last_update(events: &EventLog) -> &vialctl::app::events::UpdateMsg {
    events
        .events
        .iter()
        .rev()
        .find_map(|e| match e {
            AppEvent::ReactorUpdated { update, .. } => Some(update),
            _ => None,
        })
        .expect("no reactor update emitted")
}

// ── End to end ────────────────────────────────────────────────

#[test]
fn first_broadcast_starts_standing_program() {
    let mut app = app_with(single_vial(), 1);
    let mut link = MockLink::new();
    let mut events = EventLog::default();
    app.start(&mut link, &mut events).unwrap();
    assert!(link.sent.is_empty(), "no stir/temp/LED configured");

    app.handle_inbound(broadcast(0.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();

    let pumps = link.pump_commands();
    assert_eq!(pumps.len(), 1);
    let (values, recurring, _) = pumps[0];
    assert!(recurring);
    let touched: Vec<_> = values.touched().collect();
    assert_eq!(touched.len(), 2, "IN1 and OUT only: {touched:?}");
    let in1 = values.get(0, PumpChannel::In1).unwrap();
    let out = values.get(0, PumpChannel::Out).unwrap();
    assert_eq!(in1, PumpValue::Recurring { secs: 0.5, period: 7200.0 });
    assert!(out.secs() >= in1.secs(), "efflux must cover influx");

    let update = last_update(&events);
    assert_eq!(update.time, Some(0.0));
    assert!(matches!(update.records[..], [VialRecord::Recurrent { vial: 0, .. }]));
    assert_eq!(update.od, vec![0.3]);
    assert!(link.flushes >= 1, "commands flushed once per broadcast");
}

#[test]
fn updated_vials_are_not_resent_next_tick() {
    let mut app = app_with(single_vial(), 1);
    let mut link = MockLink::new();
    let mut events = EventLog::default();
    app.start(&mut link, &mut events).unwrap();

    app.handle_inbound(broadcast(0.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();
    app.handle_inbound(broadcast(60.0, &[0.35], &[3000.0]), &mut link, &mut events)
        .unwrap();

    assert_eq!(link.pump_commands().len(), 1);
    assert!(last_update(&events).records.is_empty());
}

#[test]
fn direct_reactor_reports_vial_state() {
    use vialctl::reactors::Reactor;
    use vialctl::reactors::chemostat::VialState;

    let mut c = controls(1);
    let mut link = MockLink::new();
    let mut chemo = Chemostat::new("chemo", single_vial(), &unit_calibrations(1), &c).unwrap();
    assert_eq!(chemo.state(0), Some(VialState::AwaitingFirstOd));

    let vialctl::rpc::inbound::Inbound::Broadcast(b) = broadcast(0.0, &[0.3], &[3000.0]) else {
        unreachable!()
    };
    chemo.update(&mut c, &mut link, &b).unwrap();

    assert_eq!(chemo.state(0), Some(VialState::UpdatedThisTick));
    assert_eq!(c.recurring_cache().len(), 2);
}

#[test]
fn zero_od_at_zero_start_threshold_starts_dilution() {
    use vialctl::reactors::Reactor;
    use vialctl::reactors::chemostat::VialState;

    let mut c = controls(1);
    let mut link = MockLink::new();
    let mut chemo = Chemostat::new("chemo", single_vial(), &unit_calibrations(1), &c).unwrap();

    let vialctl::rpc::inbound::Inbound::Broadcast(b) = broadcast(0.0, &[0.0], &[3000.0]) else {
        unreachable!()
    };
    let update = chemo.update(&mut c, &mut link, &b).unwrap();

    let pumps = link.pump_commands();
    assert_eq!(pumps.len(), 1);
    let (values, recurring, _) = pumps[0];
    assert!(recurring);
    let touched: Vec<_> = values.touched().map(|(v, ch, _)| (v, ch)).collect();
    assert_eq!(touched, vec![(0, PumpChannel::In1), (0, PumpChannel::Out)]);
    let in1 = values.get(0, PumpChannel::In1).unwrap();
    let out = values.get(0, PumpChannel::Out).unwrap();
    assert!(out.secs() >= in1.secs());
    assert_eq!(chemo.state(0), Some(VialState::UpdatedThisTick));
    assert!(matches!(update.records[..], [VialRecord::Recurrent { vial: 0, .. }]));
}

// ── Schedule ──────────────────────────────────────────────────

#[test]
fn start_delay_holds_until_due() {
    let mut s = single_vial();
    s.base.start_delays = vec![1.0]; // one unit of time (an hour)
    let mut app = app_with(s, 1);
    let mut link = MockLink::new();
    let mut events = EventLog::default();
    app.start(&mut link, &mut events).unwrap();

    app.handle_inbound(broadcast(0.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();
    app.handle_inbound(broadcast(1800.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();
    assert!(link.pump_commands().is_empty());
    assert_eq!(last_update(&events).time, None);

    app.handle_inbound(broadcast(3600.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();
    assert_eq!(link.pump_commands().len(), 1);
}

#[test]
fn duration_end_stops_vial_once() {
    let mut s = single_vial();
    s.base.durations = vec![1.0];
    let mut app = app_with(s, 1);
    let mut link = MockLink::new();
    let mut events = EventLog::default();
    app.start(&mut link, &mut events).unwrap();

    app.handle_inbound(broadcast(0.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();
    link.clear();

    app.handle_inbound(broadcast(3700.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();
    let pumps = link.pump_commands();
    assert_eq!(pumps.len(), 1);
    let (stop, recurring, immediate) = pumps[0];
    assert!(!recurring && immediate);
    assert_eq!(stop.get(0, PumpChannel::In1), Some(PumpValue::Stop));
    assert!(
        last_update(&events)
            .records
            .contains(&VialRecord::Stop { vial: 0 })
    );
    assert!(app.controls().recurring_cache().is_empty());

    link.clear();
    app.handle_inbound(broadcast(3800.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();
    assert!(link.sent.is_empty(), "a stopped vial is not stopped again");
}

// ── Setpoints ─────────────────────────────────────────────────

#[test]
fn start_sends_setpoints_and_temperature_drift_resyncs() {
    let mut s = single_vial();
    s.base.stir = vec![8.0];
    s.base.temp = vec![30.0];
    let mut app = app_with(s, 1);
    let mut link = MockLink::new();
    let mut events = EventLog::default();

    app.start(&mut link, &mut events).unwrap();
    assert!(matches!(link.sent[0], Command::Stir(_)));
    let Command::Temperature(t) = &link.sent[1] else {
        panic!("expected temperature setpoint, got {:?}", link.sent[1]);
    };
    assert!(t.immediate);
    assert!((t.get(0).unwrap() - 3000.0).abs() < 1e-6);
    link.clear();

    // 25 °C read while the device echoes no temperature config.
    app.handle_inbound(broadcast(0.0, &[0.3], &[2500.0]), &mut link, &mut events)
        .unwrap();
    let resent = link
        .sent
        .iter()
        .find_map(|c| match c {
            Command::Temperature(t) => Some(t),
            _ => None,
        })
        .expect("temperature resent");
    assert!(!resent.immediate);
}

// ── Configuration errors ──────────────────────────────────────

#[test]
fn mismatched_arrays_fail_before_anything_is_sent() {
    let mut s = chemostat_settings(&[0, 1]);
    s.bolus = vec![0.5];
    s.base.stir = vec![8.0];

    let c = controls(2);
    let err = match Chemostat::new("bad", s, &unit_calibrations(2), &c) {
        Ok(_) => panic!("construction must fail"),
        Err(e) => e,
    };

    let Error::Configuration(ConfigurationError::VialCountMismatch { fields }) = err else {
        panic!("unexpected error {err}");
    };
    assert!(fields.contains(&"bolus volumes"));
    assert!(fields.contains(&"stir"));
    assert!(c.recurring_cache().is_empty());
}

#[test]
fn end_experiment_stops_and_silences_reactor() {
    let mut app = app_with(single_vial(), 1);
    let mut link = MockLink::new();
    let mut events = EventLog::default();
    app.start(&mut link, &mut events).unwrap();
    app.handle_inbound(broadcast(0.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();
    link.clear();

    app.handle_command(AppCommand::EndExperiment, &mut link, &mut events)
        .unwrap();
    assert_eq!(link.pump_commands().len(), 1);
    assert_eq!(events.events.last(), Some(&AppEvent::ExperimentEnded));

    link.clear();
    app.handle_inbound(broadcast(60.0, &[0.3], &[3000.0]), &mut link, &mut events)
        .unwrap();
    assert!(link.pump_commands().is_empty());
}
