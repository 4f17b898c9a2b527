//! Unified error types for the vial controller.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! event loop's error handling uniform.  Each category carries its own
//! detail type so callers can match on exactly what went wrong.
//!
//! Safety-clamp *adjustments* are not errors: they are logged and the
//! adjusted values are used.  Only an infeasible request surfaces here.

use core::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or inconsistent settings.  Fatal at construction.
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A bolus/rate pair could not be made safe.
    #[error("safety clamp: {0}")]
    SafetyClamp(#[from] SafetyClampError),

    /// A calibration curve was evaluated outside its valid range.
    #[error("calibration domain: {0}")]
    Domain(#[from] DomainError),

    /// A calibration query was not answered before its deadline.
    #[error("timed out after {waited_secs:.1}s waiting for {what}")]
    Timeout { what: &'static str, waited_secs: f64 },

    /// The command or broadcast channel could not carry a message.
    #[error("transport: {0}")]
    Transport(String),

    /// An inbound message or outbound command was structurally invalid.
    #[error("protocol: {0}")]
    Protocol(String),
}

impl Error {
    /// Shorthand for a [`ConfigurationError`] built from a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::Invalid(msg.into()))
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// Per-vial arrays whose length does not match the vial set.
    #[error("number of vials does not match number of elements in {}", .fields.join(", "))]
    VialCountMismatch { fields: Vec<&'static str> },

    /// A vial id outside `[0, num_vials)`.
    #[error("vial {vial} out of range for a {num_vials}-vial unit")]
    VialOutOfRange { vial: usize, num_vials: usize },

    /// Calibration family tag not present in the registry.
    #[error("unknown calibration family '{0}'")]
    UnknownFamily(String),

    /// Parameter vector of the wrong length for its family.
    #[error("{family} curve takes {expected} parameters, got {got}")]
    Arity {
        family: &'static str,
        expected: usize,
        got: usize,
    },

    /// Any other rejected value.
    #[error("{0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Safety clamp errors
// ---------------------------------------------------------------------------

/// Which quantity could not be reconciled with the pump limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampedValue {
    Bolus,
    Rate,
    Throughput,
}

impl fmt::Display for ClampedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bolus => write!(f, "bolus"),
            Self::Rate => write!(f, "rate"),
            Self::Throughput => write!(f, "throughput"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{value} infeasible (bolus {bolus_ml:.3} mL, rate {rate:.3}/unit time, volume {volume_ml:.1} mL): {reason}")]
pub struct SafetyClampError {
    pub value: ClampedValue,
    pub bolus_ml: f64,
    pub rate: f64,
    pub volume_ml: f64,
    pub reason: &'static str,
}

// ---------------------------------------------------------------------------
// Calibration domain errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{family} {op}({input}) undefined: {reason}")]
pub struct DomainError {
    pub family: &'static str,
    pub op: &'static str,
    pub input: f64,
    pub reason: &'static str,
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
