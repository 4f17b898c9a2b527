//! Sensor subsystem — per-vial readout and the aggregating [`VialSensors`] hub.
//!
//! The hub owns the calibration curves of its vials and turns each
//! broadcast's raw device units into OD and °C, keeping a bounded
//! history per vial for smoothing.
//!
//! A reading that cannot be converted (missing field, curve evaluated
//! outside its domain, non-finite result) is logged and stored as NaN.
//! A single flaky vial must not stall the control loop.

pub mod temperature;

use std::collections::BTreeMap;

use log::{debug, error};

use crate::calibration::set::{CalibrationSet, FitSet};
use crate::control::smoothing::{MAX_WINDOW, ReadingWindow};
use crate::error::{Error, Result};
use crate::rpc::inbound::Broadcast;

/// Physical readings of one vial from one broadcast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VialReadout {
    pub vial: usize,
    pub od: f64,
    pub temp_c: f64,
}

struct VialChannel {
    fits: FitSet,
    od: ReadingWindow,
    temp: ReadingWindow,
}

/// Readout and history for the vials of one reactor.
pub struct VialSensors {
    od_sensor: String,
    temp_sensor: String,
    vials: BTreeMap<usize, VialChannel>,
    mem_len: usize,
    broadcasts: u64,
}

impl VialSensors {
    /// `mem_len` is the smoothing window, `1..=MAX_WINDOW`.
    pub fn new(calibrations: &CalibrationSet, vials: &[usize], mem_len: usize) -> Result<Self> {
        if !(1..=MAX_WINDOW).contains(&mem_len) {
            return Err(Error::config(format!("mem_len must be in 1..={MAX_WINDOW}, got {mem_len}")));
        }
        let vials = calibrations
            .fit_sets(vials)?
            .into_iter()
            .map(|(vial, fits)| {
                let channel = VialChannel {
                    fits,
                    od: ReadingWindow::new(mem_len),
                    temp: ReadingWindow::new(mem_len),
                };
                (vial, channel)
            })
            .collect();
        Ok(Self {
            od_sensor: calibrations.od_sensor().to_owned(),
            temp_sensor: calibrations.temp_sensor().to_owned(),
            vials,
            mem_len,
            broadcasts: 0,
        })
    }

    /// Swap in new curves.  Histories are kept: they hold physical units.
    pub fn replace_calibrations(&mut self, calibrations: &CalibrationSet) -> Result<()> {
        let vials: Vec<usize> = self.vials.keys().copied().collect();
        let mut fits = calibrations.fit_sets(&vials)?;
        for (vial, channel) in &mut self.vials {
            if let Some(f) = fits.remove(vial) {
                channel.fits = f;
            }
        }
        self.od_sensor = calibrations.od_sensor().to_owned();
        self.temp_sensor = calibrations.temp_sensor().to_owned();
        Ok(())
    }

    /// Convert one broadcast without touching the histories.
    pub fn readout(&self, broadcast: &Broadcast) -> Vec<VialReadout> {
        self.vials
            .iter()
            .map(|(&vial, ch)| VialReadout {
                vial,
                od: convert(broadcast, &self.od_sensor, vial, "OD", |raw| ch.fits.od.equation(raw)),
                temp_c: convert(broadcast, &self.temp_sensor, vial, "temperature", |raw| {
                    ch.fits.temp.equation(raw)
                }),
            })
            .collect()
    }

    /// Convert one broadcast and append it to every vial's history.
    pub fn record(&mut self, broadcast: &Broadcast) -> Vec<VialReadout> {
        let readout = self.readout(broadcast);
        for r in &readout {
            if let Some(ch) = self.vials.get_mut(&r.vial) {
                ch.od.push(r.od);
                ch.temp.push(r.temp_c);
            }
            debug!("vial {}: OD {:.3}, {:.2} °C", r.vial, r.od, r.temp_c);
        }
        self.broadcasts += 1;
        readout
    }

    pub fn vials(&self) -> impl Iterator<Item = usize> + '_ {
        self.vials.keys().copied()
    }

    pub fn fits(&self, vial: usize) -> Option<&FitSet> {
        self.vials.get(&vial).map(|ch| &ch.fits)
    }

    pub fn od_history(&self, vial: usize) -> Option<&ReadingWindow> {
        self.vials.get(&vial).map(|ch| &ch.od)
    }

    pub fn temp_history(&self, vial: usize) -> Option<&ReadingWindow> {
        self.vials.get(&vial).map(|ch| &ch.temp)
    }

    /// Median OD over the window, NaN if the vial has no finite reading.
    pub fn smoothed_od(&self, vial: usize) -> f64 {
        self.od_history(vial).map_or(f64::NAN, ReadingWindow::median)
    }

    /// Latest OD per vial, in vial order.
    pub fn latest_od(&self) -> Vec<f64> {
        self.vials.values().map(|ch| ch.od.latest().unwrap_or(f64::NAN)).collect()
    }

    /// Latest temperature per vial, in vial order.
    pub fn latest_temp(&self) -> Vec<f64> {
        self.vials.values().map(|ch| ch.temp.latest().unwrap_or(f64::NAN)).collect()
    }

    pub fn mem_len(&self) -> usize {
        self.mem_len
    }

    /// Broadcasts recorded so far.
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts
    }
}

fn convert<F>(broadcast: &Broadcast, sensor: &str, vial: usize, what: &str, equation: F) -> f64
where
    F: Fn(f64) -> core::result::Result<f64, crate::error::DomainError>,
{
    let Some(raw) = broadcast.reading(sensor, vial) else {
        error!("{what} sensor '{sensor}' missing for vial {vial}, setting to NaN");
        return f64::NAN;
    };
    if !raw.is_finite() {
        error!("{what} raw reading for vial {vial} is not a number");
        return f64::NAN;
    }
    match equation(raw) {
        Ok(v) => v,
        Err(e) => {
            error!("{what} read error for vial {vial} ({e}), setting to NaN");
            f64::NAN
        }
    }
}
