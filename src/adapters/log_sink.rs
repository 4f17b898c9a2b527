//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the `log` facade (stderr in the binary).  A data-file or dashboard
//! adapter would implement the same trait.

use log::{info, warn};

use crate::app::events::{AppEvent, VialRecord};
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] as one line.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::ReactorUpdated { reactor, update } => {
                let time = update.time.map_or_else(|| "-".to_owned(), |t| format!("{t:.0}"));
                info!(
                    "UPDATE | {reactor} | t={time} | vials={:?} | od={:.3?} | temp={:.2?}",
                    update.vials, update.od, update.temp
                );
                for record in &update.records {
                    match record {
                        VialRecord::Recurrent { vial, in1, in2, out } => info!(
                            "RECORD | {reactor} | vial {vial} recurrent | IN1={:.2}s IN2={:.2}s OUT={:.2}s every {:.0}s",
                            in1.0, in2.0, out.0, out.1
                        ),
                        VialRecord::Hold { vial } => info!("RECORD | {reactor} | vial {vial} hold"),
                        VialRecord::Stop { vial } => info!("RECORD | {reactor} | vial {vial} stop"),
                    }
                }
            }
            AppEvent::ReactorFailed { reactor, error } => {
                warn!("FAIL   | {reactor} | {error}");
            }
            AppEvent::Started { reactors } => {
                info!("START  | reactors={:?}", reactors);
            }
            AppEvent::Locked => info!("LOCK   | pumps locked"),
            AppEvent::Unlocked => info!("LOCK   | pumps unlocked"),
            AppEvent::PumpsStopped => info!("STOP   | all pumps"),
            AppEvent::CalibrationsReplaced => info!("CALIB  | calibrations replaced"),
            AppEvent::ExperimentEnded => info!("END    | experiment ended"),
        }
    }
}
