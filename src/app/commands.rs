//! Inbound commands to the application service.
//!
//! These represent actions requested by the operator (CLI, experiment
//! script) that the [`AppService`](super::service::AppService) interprets
//! and acts upon.

use crate::calibration::set::CalibrationSet;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Suspend standing programs and queue new dilutions.
    Lock,

    /// Restore standing programs and flush queued dilutions.
    Unlock,

    /// Immediate stop on every pump of the unit.
    StopAllPumps,

    /// Swap every reactor's curves for a freshly fetched set.
    ReplaceCalibrations(CalibrationSet),

    /// Stop every reactor's pumps; reactors stay registered.
    EndExperiment,
}
