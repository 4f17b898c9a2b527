//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them (log line, data file, dashboard).

use serde::Serialize;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Every registered reactor sent its initial setpoints.
    Started { reactors: Vec<String> },

    /// One reactor processed one broadcast.
    ReactorUpdated { reactor: String, update: UpdateMsg },

    /// A reactor's update failed; the other reactors still ran.
    ReactorFailed { reactor: String, error: String },

    Locked,
    Unlocked,
    PumpsStopped,
    CalibrationsReplaced,

    /// Every reactor stopped its pumps.
    ExperimentEnded,
}

/// What a reactor did with one broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateMsg {
    /// Broadcast time, `None` while before the start delay.
    pub time: Option<f64>,
    pub records: Vec<VialRecord>,
    pub vials: Vec<usize>,
    /// Latest OD per vial, in `vials` order.
    pub od: Vec<f64>,
    /// Latest temperature (°C) per vial, in `vials` order.
    pub temp: Vec<f64>,
}

impl UpdateMsg {
    /// Records about `vial`.
    pub fn records_for(&self, vial: usize) -> impl Iterator<Item = &VialRecord> + '_ {
        self.records.iter().filter(move |r| r.vial() == vial)
    }
}

/// Per-vial actuation record.  Pump entries are `(seconds on, period)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum VialRecord {
    /// A standing program was (re)started.
    Recurrent {
        vial: usize,
        in1: (f64, f64),
        in2: (f64, f64),
        out: (f64, f64),
    },
    /// On target: processed, nothing pumped.
    Hold { vial: usize },
    /// Past its end time; pumps stopped.
    Stop { vial: usize },
}

impl VialRecord {
    pub fn vial(&self) -> usize {
        match *self {
            Self::Recurrent { vial, .. } | Self::Hold { vial } | Self::Stop { vial } => vial,
        }
    }
}
