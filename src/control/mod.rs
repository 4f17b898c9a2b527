//! Control-law helpers shared by every controller.

pub mod dilution;
pub mod ratio;
pub mod smoothing;
