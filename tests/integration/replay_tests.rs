//! Full wire path: JSON lines in → DeviceLink → AppService → JSON lines out.

use serde_json::{Value, json};

use vialctl::adapters::json_lines::JsonLinesTransport;
use vialctl::app::ports::InboundSource;
use vialctl::app::service::AppService;
use vialctl::reactors::chemostat::Chemostat;
use vialctl::rpc::codec::decode_line;
use vialctl::rpc::link::DeviceLink;

use super::mock_link::{EventLog, app_with, chemostat_settings, controls, unit_calibrations};

fn wire_broadcast(t: f64, od: f64) -> String {
    json!({
        "event": "broadcast",
        "payload": {
            "data": {"od_135": [od], "temp": ["3000"]},
            "config": {"pump": {"value": ["--", "--", "--"], "recurring": true}},
            "timestamp": t,
        }
    })
    .to_string()
}

fn replay(input: &str, app: &mut AppService) -> (Vec<Value>, u64) {
    let transport = JsonLinesTransport::new(input.as_bytes(), Vec::new());
    let mut link = DeviceLink::new(transport, app.controls().config().float_resolution);
    let mut events = EventLog::default();
    app.start(&mut link, &mut events).unwrap();
    while let Some(msg) = link.poll().unwrap() {
        app.handle_inbound(msg, &mut link, &mut events).unwrap();
    }
    link.flush_outbound().unwrap();
    let rejected = link.rejected();
    let out = link.into_transport().into_writer();
    let lines = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| decode_line(l).unwrap().payload)
        .collect();
    (lines, rejected)
}

#[test]
fn recorded_session_produces_pump_program_on_the_wire() {
    let mut app = app_with(chemostat_settings(&[0]), 1);
    let input = format!("{}\n{}\n", wire_broadcast(0.0, 0.3), wire_broadcast(60.0, 0.31));

    let (commands, rejected) = replay(&input, &mut app);

    assert_eq!(rejected, 0);
    assert_eq!(commands.len(), 1, "one program, not resent on the second tick");
    let cmd = &commands[0];
    assert_eq!(cmd["param"], "pump");
    assert_eq!(cmd["recurring"], true);
    assert_eq!(cmd["value"], json!(["0.50|7200.00", "--", "5.50|7200.00"]));
    assert_eq!(cmd["fields_expected_outgoing"], 4);
    assert_eq!(app.broadcasts(), 2);
}

#[test]
fn garbage_and_unknown_events_are_skipped() {
    let mut app = app_with(chemostat_settings(&[0]), 1);
    let input = format!(
        "not json at all\n{}\n{}\n",
        json!({"event": "firmware_hello", "payload": {}}),
        wire_broadcast(0.0, 0.3)
    );

    let (commands, rejected) = replay(&input, &mut app);

    assert_eq!(rejected, 1, "unknown event counted, malformed line skipped by the transport");
    assert_eq!(commands.len(), 1);
}

#[test]
fn last_line_without_newline_is_read() {
    let mut app = app_with(chemostat_settings(&[0]), 1);
    let input = wire_broadcast(0.0, 0.3);

    let (commands, _) = replay(&input, &mut app);

    assert_eq!(commands.len(), 1);
}

#[test]
fn chemostat_below_start_od_stays_silent_on_the_wire() {
    let mut app = AppService::new(controls(1));
    let mut settings = chemostat_settings(&[0]);
    settings.start_od = vec![0.5];
    let chemostat = Chemostat::new(
        "late",
        settings,
        &unit_calibrations(1),
        app.controls(),
    )
    .unwrap();
    app.register(Box::new(chemostat)).unwrap();

    let (commands, _) = replay(&format!("{}\n", wire_broadcast(0.0, 0.3)), &mut app);

    assert!(commands.is_empty());
}
