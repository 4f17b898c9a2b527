//! Vial controller library.
//!
//! Coordinates the shared pumps, stirrers, heaters and LEDs of a
//! multi-vial continuous-culture unit.  Exposes the pure-logic modules
//! for integration testing; the binary wires them to a JSON-lines
//! transport.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod calibration;
pub mod config;
pub mod control;
pub mod error;
pub mod reactors;
pub mod rpc;
pub mod safety;
pub mod sensors;

pub use error::{Error, Result};
