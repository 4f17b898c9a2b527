//! Split of a bolus between the two inflow channels.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Either the IN1 fraction alone (`0.7` → 70 % IN1, 30 % IN2) or an
/// explicit `[in1, in2]` weight pair, normalised on use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PumpRatio {
    In1Fraction(f64),
    Weights([f64; 2]),
}

impl Default for PumpRatio {
    fn default() -> Self {
        Self::In1Fraction(1.0)
    }
}

impl PumpRatio {
    /// `[in1, in2]` fractions summing to one.
    pub fn fractions(&self) -> Result<[f64; 2], ConfigurationError> {
        match *self {
            Self::In1Fraction(f) if (0.0..=1.0).contains(&f) => Ok([f, 1.0 - f]),
            Self::In1Fraction(f) => Err(ConfigurationError::Invalid(format!(
                "pump ratio {f} outside [0, 1]"
            ))),
            Self::Weights([a, b]) => {
                let sum = a + b;
                if !(a >= 0.0 && b >= 0.0) || !sum.is_finite() || sum <= 0.0 {
                    return Err(ConfigurationError::Invalid(format!(
                        "pump ratio weights [{a}, {b}] must be non-negative with a positive sum"
                    )));
                }
                Ok([a / sum, b / sum])
            }
        }
    }
}
