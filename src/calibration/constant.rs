//! Constant curve `y = a`.
//!
//! Used for pump calibrations, where `a` is the channel's flow rate in
//! mL/s.  Not invertible.

use std::sync::Arc;

use super::{CalibrationCurve, CurveFamily, CurveRef, ParamBounds, domain, finite};
use crate::error::DomainError;

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    params: [f64; 1],
}

impl Constant {
    pub const ARITY: usize = 1;

    pub fn new(a: f64) -> Self {
        Self { params: [a] }
    }

    pub(super) fn build(params: &[f64]) -> CurveRef {
        Arc::new(Self::new(params[0]))
    }
}

impl CalibrationCurve for Constant {
    fn family(&self) -> CurveFamily {
        CurveFamily::Constant
    }

    fn parameters(&self) -> &[f64] {
        &self.params
    }

    fn equation(&self, x: f64) -> Result<f64, DomainError> {
        finite(CurveFamily::Constant, "equation", x, self.params[0])
    }

    fn inverse(&self, y: f64) -> Result<f64, DomainError> {
        Err(domain(CurveFamily::Constant, "inverse", y, "constant curve is not invertible"))
    }

    fn gradient(&self, x: f64) -> Result<Vec<f64>, DomainError> {
        finite(CurveFamily::Constant, "gradient", x, 0.0)?;
        Ok(vec![0.0])
    }

    fn bounds(&self, _x: &[f64], _y: &[f64]) -> ParamBounds {
        ParamBounds::unbounded(Self::ARITY)
    }

    fn initial_values(&self, _x: &[f64], _y: &[f64]) -> Vec<f64> {
        vec![0.0]
    }
}
