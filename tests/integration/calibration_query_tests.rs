//! Integration tests for the calibration queries and their deadline.

use std::collections::BTreeMap;

use vialctl::Error;
use vialctl::app::controls::Controls;
use vialctl::app::service::AppService;
use vialctl::calibration::set::{CalibrationRecord, CoefficientEntry, SensorCalibration};
use vialctl::config::ControlConfig;
use vialctl::rpc::command::Command;
use vialctl::rpc::inbound::{CalibrationDocument, CalibrationName, Inbound};

use super::mock_link::{FakeClock, MockLink, broadcast};

const VIALS: usize = 2;

fn controls() -> Controls {
    Controls::new(ControlConfig {
        num_vials: VIALS,
        ..ControlConfig::default()
    })
    .unwrap()
}

fn record(name: &str, family: &str, coefficients: Vec<CoefficientEntry>, sensor: Option<&str>) -> CalibrationRecord {
    CalibrationRecord {
        name: name.into(),
        coefficients,
        family: family.into(),
        time_fit: None,
        active: true,
        params: sensor.into_iter().map(str::to_owned).collect(),
    }
}

fn device_calibrations() -> Vec<SensorCalibration> {
    let linear = || vec![CoefficientEntry::Vector(vec![0.0, 1.0]); VIALS];
    let mut stale = record("old_od", "linear", linear(), Some("od_90"));
    stale.active = false;
    vec![
        SensorCalibration {
            name: Some("od".into()),
            calibration_type: "od".into(),
            fits: vec![stale, record("od_fit", "linear", linear(), Some("od_135"))],
        },
        SensorCalibration {
            name: Some("temp".into()),
            calibration_type: "temperature".into(),
            fits: vec![record("temp_fit", "linear", linear(), Some("temp"))],
        },
        SensorCalibration {
            name: Some("pump".into()),
            calibration_type: "pump".into(),
            fits: vec![record(
                "pump_fit",
                "constant",
                vec![CoefficientEntry::Text("1.0".into()); 3 * VIALS],
                None,
            )],
        },
    ]
}

#[test]
fn unanswered_query_times_out() {
    let mut c = controls();
    let mut link = MockLink::new();
    let mut clock = FakeClock::default();

    let err = c.request_active_calibrations(&mut link, &mut clock).unwrap_err();

    let Error::Timeout { what, waited_secs } = err else {
        panic!("expected a timeout, got {err}");
    };
    assert_eq!(what, "active calibrations");
    assert!(waited_secs >= 10.0);
    assert!(clock.sleeps >= 49, "polled every 200 ms: {} sleeps", clock.sleeps);
    assert_eq!(link.sent, vec![Command::GetActiveCalibrations]);
}

#[test]
fn response_of_another_kind_does_not_satisfy_query() {
    let mut c = controls();
    let mut link = MockLink::with_responder(|cmd| {
        matches!(cmd, Command::GetCalibrationNames).then(|| Inbound::ActiveCalibrations(Vec::new()))
    });
    let mut clock = FakeClock::default();

    let err = c.request_calibration_names(&mut link, &mut clock).unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(c.active_calibrations().is_some(), "the stray answer is still stored");
}

#[test]
fn broadcasts_during_query_refresh_snapshot() {
    let mut c = controls();
    let mut link = MockLink::with_responder(|cmd| match cmd {
        Command::GetCalibrationNames => Some(Inbound::CalibrationNames(vec![CalibrationName {
            name: "od_fit".into(),
            calibration_type: Some("od".into()),
        }])),
        _ => None,
    });
    link.push(broadcast(12.0, &[0.1, 0.2], &[3000.0, 3000.0]));
    let mut clock = FakeClock::default();

    let names = c.request_calibration_names(&mut link, &mut clock).unwrap();

    assert_eq!(names.len(), 1);
    assert_eq!(c.last_broadcast_time(), Some(12.0));
    assert_eq!(clock.sleeps, 0, "answered on the first poll");
}

#[test]
fn named_calibration_is_fetched() {
    let mut c = controls();
    let mut link = MockLink::with_responder(|cmd| match cmd {
        Command::GetCalibration { name } => Some(Inbound::Calibration(CalibrationDocument {
            name: name.clone(),
            calibration_type: Some("od".into()),
            fits: Vec::new(),
            extra: BTreeMap::new(),
        })),
        _ => None,
    });
    let mut clock = FakeClock::default();

    let doc = c.request_calibration(&mut link, &mut clock, "od_fit").unwrap();

    assert_eq!(doc.name, "od_fit");
    assert_eq!(
        link.sent,
        vec![Command::GetCalibration {
            name: "od_fit".into()
        }]
    );
}

#[test]
fn service_builds_calibration_set_from_active_fits() {
    let mut app = AppService::new(controls());
    let mut link = MockLink::with_responder(|cmd| {
        matches!(cmd, Command::GetActiveCalibrations).then(|| Inbound::ActiveCalibrations(device_calibrations()))
    });
    let mut clock = FakeClock::default();

    let set = app.fetch_calibrations(&mut link, &mut clock).unwrap();

    assert_eq!(set.num_vials(), VIALS);
    assert_eq!(set.od_sensor(), "od_135", "the active fit wins over the stale one");
    assert_eq!(set.temp_sensor(), "temp");
    assert_eq!(set.fit_set(1).unwrap().flows().unwrap(), [1.0, 1.0, 1.0]);
}
