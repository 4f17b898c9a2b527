//! Logarithmic curve `y = a·ln(b·(x − c))`.
//!
//! Defined only where `b·(x − c) > 0`.  Increasing data puts `c` below the
//! smallest raw reading with `b > 0`; decreasing data puts `c` above the
//! largest with `b < 0`.

use std::sync::Arc;

use super::{
    CalibrationCurve, CurveFamily, CurveRef, ParamBounds, domain, finite, min_max, trend_sign,
};
use crate::error::DomainError;

#[derive(Debug, Clone, PartialEq)]
pub struct Log {
    params: [f64; 3],
}

impl Log {
    pub const ARITY: usize = 3;

    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { params: [a, b, c] }
    }

    pub(super) fn build(params: &[f64]) -> CurveRef {
        Arc::new(Self::new(params[0], params[1], params[2]))
    }

    fn argument(&self, op: &'static str, x: f64) -> Result<f64, DomainError> {
        let [_, b, c] = self.params;
        let arg = b * (x - c);
        if arg.is_nan() || arg <= 0.0 {
            return Err(domain(CurveFamily::Log, op, x, "logarithm of a non-positive argument"));
        }
        Ok(arg)
    }
}

impl CalibrationCurve for Log {
    fn family(&self) -> CurveFamily {
        CurveFamily::Log
    }

    fn parameters(&self) -> &[f64] {
        &self.params
    }

    fn equation(&self, x: f64) -> Result<f64, DomainError> {
        let a = self.params[0];
        let arg = self.argument("equation", x)?;
        finite(CurveFamily::Log, "equation", x, a * arg.ln())
    }

    fn inverse(&self, y: f64) -> Result<f64, DomainError> {
        let [a, b, c] = self.params;
        if a == 0.0 || b == 0.0 {
            return Err(domain(CurveFamily::Log, "inverse", y, "degenerate curve"));
        }
        finite(CurveFamily::Log, "inverse", y, (y / a).exp() / b + c)
    }

    fn gradient(&self, x: f64) -> Result<Vec<f64>, DomainError> {
        let [a, b, c] = self.params;
        let arg = self.argument("gradient", x)?;
        Ok(vec![arg.ln(), a / b, a / (c - x)])
    }

    fn bounds(&self, x: &[f64], y: &[f64]) -> ParamBounds {
        let (x_lo, x_hi) = min_max(x);
        if trend_sign(x, y) <= 0.0 {
            ParamBounds {
                lower: vec![f64::NEG_INFINITY, f64::NEG_INFINITY, x_hi],
                upper: vec![f64::INFINITY, 0.0, f64::INFINITY],
            }
        } else {
            ParamBounds {
                lower: vec![f64::NEG_INFINITY, 0.0, f64::NEG_INFINITY],
                upper: vec![f64::INFINITY, f64::INFINITY, x_lo],
            }
        }
    }

    fn initial_values(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let sign = trend_sign(x, y);
        let (x_lo, x_hi) = min_max(x);
        let (y_lo, y_hi) = min_max(y);
        let c = if sign <= 0.0 { x_hi * 1.1 } else { x_lo * 0.9 };
        vec![(y_hi - y_lo) / 2.0, sign, c]
    }
}
