//! Serial-dilution volume planner
//!
//! Treats OD as a concentration proxy and splits the total dilution
//! factor (current → target) geometrically over the remaining steps.
//! A robustness correction scales the bolus with the fraction of steps
//! left so that a noisy low reading does not leave the vial under-diluted.
//!
//! A vial counts as on target when diluting it all the way in one step
//! would take less than half of `bolus_volume_min_ml`: the smallest pulse
//! the pumps can deliver would overshoot by more than it corrects.

/// Tunables of the planner (see [`ControlConfig`](crate::config::ControlConfig)).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerParams {
    /// Exponent applied to the fraction of steps already covered.
    pub pow_param: f64,
    /// Additive offset on the number of dilutions left.
    pub const_param: f64,
    pub bolus_volume_min_ml: f64,
    pub bolus_volume_max_ml: f64,
}

/// Volume (mL) to add this cycle to move `current_od` toward `target_od`.
///
/// `starting_od` is the OD at which the dilution series began and sets the
/// scale of the series.  Returns `0.0` when no dilution is needed; any
/// positive result lies in `[bolus_volume_min_ml, bolus_volume_max_ml]`.
pub fn compute_bolus_volume(
    params: &PlannerParams,
    current_od: f64,
    starting_od: f64,
    target_od: f64,
    steps: u32,
    volume_ml: f64,
) -> f64 {
    if !(current_od.is_finite() && target_od.is_finite() && current_od > 0.0 && target_od > 0.0) {
        return 0.0;
    }
    let dilution_factor = current_od / target_od;
    let single_step = volume_ml * (dilution_factor - 1.0);
    if !(single_step >= params.bolus_volume_min_ml / 2.0) {
        return 0.0;
    }

    let bolus = if steps <= 1 {
        single_step
    } else {
        let scale = (starting_od / target_od).ln();
        let steps = f64::from(steps);
        let location = (steps - 1.0) * dilution_factor.ln() / scale;
        let robustness = 1.0 - 2.0 * (location / steps).powf(params.pow_param);
        let dilutions_left = location + params.const_param * robustness;
        if scale.is_finite() && scale > 0.0 && dilutions_left > 0.0 {
            (dilution_factor.powf(dilutions_left.recip()) - 1.0) * volume_ml
        } else {
            // No usable series (start at or below target): dilute in one go.
            single_step
        }
    };

    if !(bolus.is_finite() && bolus > 0.0) {
        return 0.0;
    }
    bolus.clamp(params.bolus_volume_min_ml, params.bolus_volume_max_ml)
}
