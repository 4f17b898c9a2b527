//! Sigmoid curve `y = a + b / (1 + e^(d·x − c))`.

use std::sync::Arc;

use super::{CalibrationCurve, CurveFamily, CurveRef, ParamBounds, domain, finite, min_max, trend_sign};
use crate::error::DomainError;

#[derive(Debug, Clone, PartialEq)]
pub struct Sigmoid {
    params: [f64; 4],
}

impl Sigmoid {
    pub const ARITY: usize = 4;

    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { params: [a, b, c, d] }
    }

    pub(super) fn build(params: &[f64]) -> CurveRef {
        Arc::new(Self::new(params[0], params[1], params[2], params[3]))
    }
}

impl CalibrationCurve for Sigmoid {
    fn family(&self) -> CurveFamily {
        CurveFamily::Sigmoid
    }

    fn parameters(&self) -> &[f64] {
        &self.params
    }

    fn equation(&self, x: f64) -> Result<f64, DomainError> {
        let [a, b, c, d] = self.params;
        finite(CurveFamily::Sigmoid, "equation", x, a + b / (1.0 + (d * x - c).exp()))
    }

    fn inverse(&self, y: f64) -> Result<f64, DomainError> {
        let [a, b, c, d] = self.params;
        if d == 0.0 || b == 0.0 {
            return Err(domain(CurveFamily::Sigmoid, "inverse", y, "degenerate curve"));
        }
        // y must lie strictly between the asymptotes a and a + b.
        let inner = b / (y - a) - 1.0;
        if inner.is_nan() || inner <= 0.0 {
            return Err(domain(CurveFamily::Sigmoid, "inverse", y, "value outside the curve's range"));
        }
        finite(CurveFamily::Sigmoid, "inverse", y, (inner.ln() + c) / d)
    }

    fn gradient(&self, x: f64) -> Result<Vec<f64>, DomainError> {
        let [_, b, c, d] = self.params;
        let e = finite(CurveFamily::Sigmoid, "gradient", x, (d * x - c).exp())?;
        let denom = (1.0 + e) * (1.0 + e);
        Ok(vec![1.0, 1.0 / (1.0 + e), b * e / denom, -b * x * e / denom])
    }

    fn bounds(&self, _x: &[f64], _y: &[f64]) -> ParamBounds {
        ParamBounds::unbounded(Self::ARITY)
    }

    fn initial_values(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let sign = trend_sign(x, y);
        let (_, x_hi) = min_max(x);
        let (y_lo, y_hi) = min_max(y);
        let a = if sign >= 0.0 { 0.7 * y_lo } else { 1.3 * y_hi };
        let d = if x_hi != 0.0 { -1.0 / x_hi } else { -1.0 };
        vec![a, sign * 2.0 * (y_hi - y_lo), -1.0, d]
    }
}
