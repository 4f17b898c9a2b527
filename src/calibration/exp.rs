//! Exponential curve `y = a·e^(b·x)`.

use std::sync::Arc;

use super::{CalibrationCurve, CurveFamily, CurveRef, ParamBounds, domain, finite, min_max, trend_sign};
use crate::error::DomainError;

#[derive(Debug, Clone, PartialEq)]
pub struct Exp {
    params: [f64; 2],
}

impl Exp {
    pub const ARITY: usize = 2;

    pub fn new(a: f64, b: f64) -> Self {
        Self { params: [a, b] }
    }

    pub(super) fn build(params: &[f64]) -> CurveRef {
        Arc::new(Self::new(params[0], params[1]))
    }
}

impl CalibrationCurve for Exp {
    fn family(&self) -> CurveFamily {
        CurveFamily::Exp
    }

    fn parameters(&self) -> &[f64] {
        &self.params
    }

    fn equation(&self, x: f64) -> Result<f64, DomainError> {
        let [a, b] = self.params;
        finite(CurveFamily::Exp, "equation", x, a * (b * x).exp())
    }

    fn inverse(&self, y: f64) -> Result<f64, DomainError> {
        let [a, b] = self.params;
        if b == 0.0 {
            return Err(domain(CurveFamily::Exp, "inverse", y, "zero rate constant"));
        }
        let ratio = y / a;
        if ratio.is_nan() || ratio <= 0.0 {
            return Err(domain(CurveFamily::Exp, "inverse", y, "value has the wrong sign for this curve"));
        }
        finite(CurveFamily::Exp, "inverse", y, ratio.ln() / b)
    }

    fn gradient(&self, x: f64) -> Result<Vec<f64>, DomainError> {
        let [a, b] = self.params;
        let e = finite(CurveFamily::Exp, "gradient", x, (b * x).exp())?;
        Ok(vec![e, a * x * e])
    }

    fn bounds(&self, _x: &[f64], _y: &[f64]) -> ParamBounds {
        ParamBounds::unbounded(Self::ARITY)
    }

    fn initial_values(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let (y_lo, _) = min_max(y);
        vec![y_lo, trend_sign(x, y)]
    }
}
