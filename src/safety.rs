//! Bolus/rate safety clamp.
//!
//! A standing dilution program is a pair (bolus volume, pulse rate).  The
//! pumps impose three limits on it:
//!
//! 1. **Pulse period** — `secs_per_unit_time / rate` must be at least
//!    `min_pump_period_secs`.
//! 2. **Pulse volume** — a recurring bolus must lie in
//!    `[bolus_volume_min_ml, bolus_repeat_max_ml]`.
//! 3. **Throughput** — `bolus × rate` must not exceed one vessel volume
//!    per unit of time.
//!
//! The clamp runs in one of two modes.  [`ClampMode::Strict`] reports the
//! first violated limit.  [`ClampMode::Adjust`] keeps the requested
//! volumetric throughput (capped at one vessel volume) and trades bolus
//! against period until every limit holds, failing only when no such
//! trade exists.  Adjustments are logged, never silent.

use log::warn;

use crate::error::{ClampedValue, SafetyClampError};

/// Relative slack for comparisons against limits that the clamp itself
/// computed (e.g. `secs / (secs / period)` is not bit-exact).
const TOLERANCE: f64 = 1e-9;

/// Hardware limits the clamp enforces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpLimits {
    pub min_pump_period_secs: f64,
    pub bolus_repeat_max_ml: f64,
    pub bolus_volume_min_ml: f64,
    pub secs_per_unit_time: f64,
}

impl PumpLimits {
    /// Seconds between pulses for `rate` pulses per unit of time.
    pub fn period_secs(&self, rate: f64) -> f64 {
        self.secs_per_unit_time / rate
    }

    /// Highest pulse rate the pumps allow.
    pub fn max_rate(&self) -> f64 {
        self.secs_per_unit_time / self.min_pump_period_secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampMode {
    /// Fail on the first violated limit.
    Strict,
    /// Trade bolus against period to satisfy every limit.
    Adjust,
}

/// Result of a successful clamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampOutcome {
    /// `true` if either value differs from the request.
    pub adjusted: bool,
    pub bolus_ml: f64,
    /// Pulses per unit of time.
    pub rate: f64,
}

/// Enforce the pump limits on a (bolus, rate) request for a vessel of
/// `total_volume_ml`.
pub fn clamp_bolus_rate(
    limits: &PumpLimits,
    bolus_ml: f64,
    rate: f64,
    total_volume_ml: f64,
    mode: ClampMode,
) -> Result<ClampOutcome, SafetyClampError> {
    let fail = |value, bolus_ml, rate, reason| SafetyClampError {
        value,
        bolus_ml,
        rate,
        volume_ml: total_volume_ml,
        reason,
    };

    if !(bolus_ml.is_finite() && bolus_ml > 0.0) {
        return Err(fail(ClampedValue::Bolus, bolus_ml, rate, "bolus must be positive"));
    }
    if !(rate.is_finite() && rate > 0.0) {
        return Err(fail(ClampedValue::Rate, bolus_ml, rate, "rate must be positive"));
    }
    if !(total_volume_ml.is_finite() && total_volume_ml > 0.0) {
        return Err(fail(
            ClampedValue::Throughput,
            bolus_ml,
            rate,
            "vessel volume must be positive",
        ));
    }

    let over_throughput = bolus_ml * rate > total_volume_ml * (1.0 + TOLERANCE);
    let over_bolus = bolus_ml > limits.bolus_repeat_max_ml * (1.0 + TOLERANCE);
    let under_bolus = bolus_ml < limits.bolus_volume_min_ml * (1.0 - TOLERANCE);
    let short_period =
        limits.period_secs(rate) < limits.min_pump_period_secs * (1.0 - TOLERANCE);

    if !(over_throughput || over_bolus || under_bolus || short_period) {
        return Ok(ClampOutcome {
            adjusted: false,
            bolus_ml,
            rate,
        });
    }

    if mode == ClampMode::Strict {
        let (value, reason) = if over_throughput {
            (ClampedValue::Throughput, "exceeds one vessel volume per unit time")
        } else if over_bolus {
            (ClampedValue::Bolus, "above recurring bolus maximum")
        } else if under_bolus {
            (ClampedValue::Bolus, "below minimum pulse volume")
        } else {
            (ClampedValue::Rate, "pulse period below pump minimum")
        };
        return Err(fail(value, bolus_ml, rate, reason));
    }

    // ── Adjust: hold throughput, move bolus and period ────────────
    let mut bolus = bolus_ml;
    let mut pulse_rate = rate;

    if over_throughput {
        bolus = total_volume_ml / pulse_rate;
    }
    let throughput = bolus * pulse_rate;

    if bolus > limits.bolus_repeat_max_ml {
        bolus = limits.bolus_repeat_max_ml;
        pulse_rate = throughput / bolus;
    }

    if limits.period_secs(pulse_rate) < limits.min_pump_period_secs {
        pulse_rate = limits.max_rate();
        bolus = throughput / pulse_rate;
        if bolus > limits.bolus_repeat_max_ml * (1.0 + TOLERANCE) {
            return Err(fail(
                ClampedValue::Rate,
                bolus_ml,
                rate,
                "no pulse period within limits keeps the bolus under the recurring maximum",
            ));
        }
    }

    if bolus < limits.bolus_volume_min_ml {
        // Larger, rarer pulses: the period only grows.
        bolus = limits.bolus_volume_min_ml;
        pulse_rate = throughput / bolus;
    }

    warn!(
        "Adjusted bolus/rate {:.3} mL @ {:.3} -> {:.3} mL @ {:.3} to fit pump limits",
        bolus_ml, rate, bolus, pulse_rate
    );

    Ok(ClampOutcome {
        adjusted: true,
        bolus_ml: bolus,
        rate: pulse_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> PumpLimits {
        PumpLimits {
            min_pump_period_secs: 120.0,
            bolus_repeat_max_ml: 5.0,
            bolus_volume_min_ml: 0.2,
            secs_per_unit_time: 3600.0,
        }
    }

    #[test]
    fn feasible_request_passes_unchanged() {
        let out = clamp_bolus_rate(&limits(), 0.5, 0.5, 30.0, ClampMode::Strict).unwrap();
        assert!(!out.adjusted);
        assert_eq!(out.bolus_ml, 0.5);
        assert_eq!(out.rate, 0.5);
    }

    #[test]
    fn strict_rejects_short_period() {
        // 60 pulses/h = one every 60 s
        let err = clamp_bolus_rate(&limits(), 0.3, 60.0, 30.0, ClampMode::Strict).unwrap_err();
        assert_eq!(err.value, ClampedValue::Rate);
    }

    #[test]
    fn strict_rejects_throughput() {
        let err = clamp_bolus_rate(&limits(), 4.0, 10.0, 30.0, ClampMode::Strict).unwrap_err();
        assert_eq!(err.value, ClampedValue::Throughput);
    }

    #[test]
    fn adjust_stretches_period_and_grows_bolus() {
        let out = clamp_bolus_rate(&limits(), 0.3, 60.0, 30.0, ClampMode::Adjust).unwrap();
        assert!(out.adjusted);
        assert!((out.rate - 30.0).abs() < 1e-9);
        assert!((out.bolus_ml - 0.6).abs() < 1e-9);
    }

    #[test]
    fn adjust_splits_large_bolus() {
        let out = clamp_bolus_rate(&limits(), 10.0, 1.0, 30.0, ClampMode::Adjust).unwrap();
        assert!(out.adjusted);
        assert_eq!(out.bolus_ml, 5.0);
        assert!((out.rate - 2.0).abs() < 1e-9);
    }

    #[test]
    fn adjust_fails_when_no_trade_exists() {
        // 25 mL/h needs > 5 mL pulses at the fastest allowed pulse rate
        let err = clamp_bolus_rate(&limits(), 5.0, 40.0, 300.0, ClampMode::Adjust).unwrap_err();
        assert_eq!(err.value, ClampedValue::Rate);
    }

    #[test]
    fn adjust_raises_tiny_bolus() {
        let out = clamp_bolus_rate(&limits(), 0.1, 2.0, 30.0, ClampMode::Adjust).unwrap();
        assert_eq!(out.bolus_ml, 0.2);
        assert!((out.rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn non_positive_inputs_rejected() {
        assert!(clamp_bolus_rate(&limits(), 0.0, 1.0, 30.0, ClampMode::Adjust).is_err());
        assert!(clamp_bolus_rate(&limits(), 1.0, 0.0, 30.0, ClampMode::Adjust).is_err());
        assert!(clamp_bolus_rate(&limits(), 1.0, 1.0, 0.0, ClampMode::Adjust).is_err());
    }
}
