//! Temperature setpoint supervision.
//!
//! The device regulates temperature itself; the controller only checks
//! that it is regulating towards the right raw setpoint.  When any vial
//! drifts more than `max_delta_c` from its setpoint, the device's echoed
//! raw setpoints are compared with `inverse(setpoint)` and every vial
//! whose echo disagrees is resent.  A drift with a matching echo is the
//! heater still settling and only gets logged.

use log::{debug, error, info};

use super::{VialReadout, VialSensors};

/// Setpoints in °C for a reactor's vials.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureGuard {
    setpoints: Vec<(usize, f64)>,
    max_delta_c: f64,
}

impl TemperatureGuard {
    pub fn new(vials: &[usize], setpoints_c: &[f64], max_delta_c: f64) -> Self {
        Self {
            setpoints: vials.iter().copied().zip(setpoints_c.iter().copied()).collect(),
            max_delta_c,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }

    pub fn setpoint(&self, vial: usize) -> Option<f64> {
        self.setpoints.iter().find(|(v, _)| *v == vial).map(|&(_, sp)| sp)
    }

    /// Raw device setpoints for every vial, via each vial's temperature curve.
    ///
    /// Vials whose curve cannot invert their setpoint are logged and left out.
    pub fn raw_setpoints(&self, sensors: &VialSensors) -> (Vec<usize>, Vec<f64>) {
        let mut vials = Vec::with_capacity(self.setpoints.len());
        let mut raws = Vec::with_capacity(self.setpoints.len());
        for &(vial, sp) in &self.setpoints {
            if let Some(raw) = raw_setpoint(sensors, vial, sp) {
                vials.push(vial);
                raws.push(raw);
            }
        }
        (vials, raws)
    }

    /// Vials (and their raw setpoints) that need resending, if any.
    ///
    /// `echoed_raw` is the device's temperature config, indexed by vial.
    pub fn check(
        &self,
        sensors: &VialSensors,
        readout: &[VialReadout],
        echoed_raw: &[f64],
    ) -> Option<(Vec<usize>, Vec<f64>)> {
        let max_diff = readout
            .iter()
            .filter_map(|r| Some((r.temp_c - self.setpoint(r.vial)?).abs()))
            .filter(|d| d.is_finite())
            .fold(0.0_f64, f64::max);
        if max_diff <= self.max_delta_c {
            return None;
        }

        let mut vials = Vec::new();
        let mut raws = Vec::new();
        for &(vial, sp) in &self.setpoints {
            let Some(raw) = raw_setpoint(sensors, vial, sp) else {
                continue;
            };
            let echoed = echoed_raw.get(vial).copied().unwrap_or(f64::NAN);
            // Raw setpoints are integer device units.
            if echoed.round() != raw.round() {
                vials.push(vial);
                raws.push(raw);
            }
        }

        if vials.is_empty() {
            debug!(
                "temperature off setpoint by {max_diff:.2} °C (max {:.2}) but device config matches, still settling",
                self.max_delta_c
            );
            return None;
        }
        info!("updating temperatures on vials {vials:?}, local setpoint differs from device setpoint");
        Some((vials, raws))
    }
}

fn raw_setpoint(sensors: &VialSensors, vial: usize, setpoint_c: f64) -> Option<f64> {
    let fits = sensors.fits(vial)?;
    match fits.temp.inverse(setpoint_c) {
        Ok(raw) => Some(raw),
        Err(e) => {
            error!("cannot convert {setpoint_c} °C for vial {vial}: {e}");
            None
        }
    }
}
