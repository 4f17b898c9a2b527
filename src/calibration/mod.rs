//! Calibration curves — raw device units ↔ physical units.
//!
//! Every curve family implements the [`CalibrationCurve`] capability set.
//! Families are looked up by their wire tag in a static registry:
//!
//! ```text
//! ┌──────────┬───────┬─────────────────────────┬──────────────┐
//! │ tag      │ arity │ equation                │ build        │
//! ├──────────┼───────┼─────────────────────────┼──────────────┤
//! │ linear   │ 2     │ a + b*x                 │ fn(&[f64])   │
//! │ log      │ 3     │ a*ln(b*(x-c))           │ fn(&[f64])   │
//! │ exp      │ 2     │ a*e^(b*x)               │ fn(&[f64])   │
//! │ constant │ 1     │ a                       │ fn(&[f64])   │
//! │ sigmoid  │ 4     │ a + b/(1+e^(d*x-c))     │ fn(&[f64])   │
//! └──────────┴───────┴─────────────────────────┴──────────────┘
//! ```
//!
//! Curves are immutable once built; a recalibration replaces the whole
//! [`CalibrationSet`](set::CalibrationSet).  `bounds` and
//! `initial_values` exist for the offline fitter and are kept on the
//! trait so a new family plugs in without touching any caller.

pub mod constant;
pub mod exp;
pub mod linear;
pub mod log;
pub mod set;
pub mod sigmoid;

use core::fmt;
use std::sync::Arc;

use crate::error::{ConfigurationError, DomainError, Result};

// ---------------------------------------------------------------------------
// Capability set
// ---------------------------------------------------------------------------

/// Lower/upper bound per parameter for the offline fitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ParamBounds {
    /// Every parameter unbounded.
    pub fn unbounded(arity: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; arity],
            upper: vec![f64::INFINITY; arity],
        }
    }
}

pub trait CalibrationCurve: fmt::Debug + Send + Sync {
    fn family(&self) -> CurveFamily;

    fn parameters(&self) -> &[f64];

    /// Raw reading → physical unit.
    fn equation(&self, x: f64) -> core::result::Result<f64, DomainError>;

    /// Physical unit → raw reading; exact algebraic inverse of `equation`.
    fn inverse(&self, y: f64) -> core::result::Result<f64, DomainError>;

    /// Partial derivatives of `equation` at `x`, one per parameter.
    fn gradient(&self, x: f64) -> core::result::Result<Vec<f64>, DomainError>;

    /// Parameter bounds suited to the observed calibration data.
    fn bounds(&self, x: &[f64], y: &[f64]) -> ParamBounds;

    /// Starting guess for the fitter from the observed calibration data.
    fn initial_values(&self, x: &[f64], y: &[f64]) -> Vec<f64>;
}

/// Shared handle to an immutable curve.
pub type CurveRef = Arc<dyn CalibrationCurve>;

// ---------------------------------------------------------------------------
// Family tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurveFamily {
    Linear,
    Log,
    Exp,
    Constant,
    Sigmoid,
}

impl CurveFamily {
    /// Wire tag of the family.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Log => "log",
            Self::Exp => "exp",
            Self::Constant => "constant",
            Self::Sigmoid => "sigmoid",
        }
    }
}

impl fmt::Display for CurveFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Constructor for a family from its parameter vector (arity pre-checked).
pub type CurveBuildFn = fn(&[f64]) -> CurveRef;

/// One row of the family registry.
pub struct CurveEntry {
    pub family: CurveFamily,
    pub arity: usize,
    pub equation: &'static str,
    pub build: CurveBuildFn,
}

/// Every known family, keyed by [`CurveFamily::tag`].
pub static REGISTRY: [CurveEntry; 5] = [
    CurveEntry {
        family: CurveFamily::Linear,
        arity: linear::Linear::ARITY,
        equation: "a + b * x",
        build: linear::Linear::build,
    },
    CurveEntry {
        family: CurveFamily::Log,
        arity: log::Log::ARITY,
        equation: "a * log(b * (x - c))",
        build: log::Log::build,
    },
    CurveEntry {
        family: CurveFamily::Exp,
        arity: exp::Exp::ARITY,
        equation: "a * e^(b * x)",
        build: exp::Exp::build,
    },
    CurveEntry {
        family: CurveFamily::Constant,
        arity: constant::Constant::ARITY,
        equation: "a",
        build: constant::Constant::build,
    },
    CurveEntry {
        family: CurveFamily::Sigmoid,
        arity: sigmoid::Sigmoid::ARITY,
        equation: "a + b / (1 + e^(d * x - c))",
        build: sigmoid::Sigmoid::build,
    },
];

/// Find the registry row for a wire tag.
pub fn lookup(tag: &str) -> Option<&'static CurveEntry> {
    REGISTRY.iter().find(|e| e.family.tag() == tag)
}

/// Build a curve from its wire tag and parameter vector.
pub fn build_curve(tag: &str, params: &[f64]) -> Result<CurveRef> {
    let entry = lookup(tag).ok_or_else(|| ConfigurationError::UnknownFamily(tag.to_owned()))?;
    if params.len() != entry.arity {
        return Err(ConfigurationError::Arity {
            family: entry.family.tag(),
            expected: entry.arity,
            got: params.len(),
        }
        .into());
    }
    if let Some(bad) = params.iter().find(|p| !p.is_finite()) {
        return Err(ConfigurationError::Invalid(format!(
            "{} curve parameter {bad} is not finite",
            entry.family
        ))
        .into());
    }
    Ok((entry.build)(params))
}

// ---------------------------------------------------------------------------
// Helpers shared by the families
// ---------------------------------------------------------------------------

fn domain(family: CurveFamily, op: &'static str, input: f64, reason: &'static str) -> DomainError {
    DomainError {
        family: family.tag(),
        op,
        input,
        reason,
    }
}

/// Reject non-finite inputs and outputs instead of extrapolating.
fn finite(
    family: CurveFamily,
    op: &'static str,
    input: f64,
    value: f64,
) -> core::result::Result<f64, DomainError> {
    if !input.is_finite() {
        return Err(domain(family, op, input, "input is not finite"));
    }
    if !value.is_finite() {
        return Err(domain(family, op, input, "result is not finite"));
    }
    Ok(value)
}

/// `+1.0` if `y` peaks at a larger `x` than where it bottoms out.
fn trend_sign(x: &[f64], y: &[f64]) -> f64 {
    let argmax = y
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i);
    let argmin = y
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i);
    match (x.get(argmax), x.get(argmin)) {
        (Some(hi), Some(lo)) if hi > lo => 1.0,
        (Some(hi), Some(lo)) if hi < lo => -1.0,
        _ => 0.0,
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tags_are_unique() {
        for (i, a) in REGISTRY.iter().enumerate() {
            for b in &REGISTRY[i + 1..] {
                assert_ne!(a.family.tag(), b.family.tag());
            }
        }
    }

    #[test]
    fn build_by_tag() {
        let c = build_curve("linear", &[1.0, 2.0]).unwrap();
        assert_eq!(c.family(), CurveFamily::Linear);
        assert_eq!(c.equation(3.0).unwrap(), 7.0);
    }

    #[test]
    fn unknown_tag_is_configuration_error() {
        let err = build_curve("cubic", &[1.0]).unwrap_err();
        assert!(err.to_string().contains("unknown calibration family"));
    }

    #[test]
    fn wrong_arity_is_configuration_error() {
        let err = build_curve("log", &[1.0, 2.0]).unwrap_err();
        assert!(err.to_string().contains("takes 3 parameters, got 2"), "{err}");
    }

    #[test]
    fn non_finite_parameters_rejected() {
        assert!(build_curve("exp", &[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn trend_sign_detects_direction() {
        assert_eq!(trend_sign(&[0.0, 1.0, 2.0], &[1.0, 2.0, 3.0]), 1.0);
        assert_eq!(trend_sign(&[0.0, 1.0, 2.0], &[3.0, 2.0, 1.0]), -1.0);
    }
}
