//! Linear curve `y = a + b·x`.

use std::sync::Arc;

use super::{CalibrationCurve, CurveFamily, CurveRef, ParamBounds, domain, finite, min_max};
use crate::error::DomainError;

#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    params: [f64; 2],
}

impl Linear {
    pub const ARITY: usize = 2;

    pub fn new(a: f64, b: f64) -> Self {
        Self { params: [a, b] }
    }

    pub(super) fn build(params: &[f64]) -> CurveRef {
        Arc::new(Self::new(params[0], params[1]))
    }
}

impl CalibrationCurve for Linear {
    fn family(&self) -> CurveFamily {
        CurveFamily::Linear
    }

    fn parameters(&self) -> &[f64] {
        &self.params
    }

    fn equation(&self, x: f64) -> Result<f64, DomainError> {
        let [a, b] = self.params;
        finite(CurveFamily::Linear, "equation", x, a + b * x)
    }

    fn inverse(&self, y: f64) -> Result<f64, DomainError> {
        let [a, b] = self.params;
        if b == 0.0 {
            return Err(domain(CurveFamily::Linear, "inverse", y, "zero slope"));
        }
        finite(CurveFamily::Linear, "inverse", y, (y - a) / b)
    }

    fn gradient(&self, x: f64) -> Result<Vec<f64>, DomainError> {
        finite(CurveFamily::Linear, "gradient", x, x)?;
        Ok(vec![1.0, x])
    }

    fn bounds(&self, _x: &[f64], _y: &[f64]) -> ParamBounds {
        ParamBounds::unbounded(Self::ARITY)
    }

    fn initial_values(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let (x_lo, x_hi) = min_max(x);
        let (y_lo, y_hi) = min_max(y);
        let span = x_hi - x_lo;
        let slope = if span.is_finite() && span > 0.0 {
            (y_hi - y_lo) / span
        } else {
            1.0
        };
        vec![0.0, slope]
    }
}
