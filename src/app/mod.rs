//! Application core — pure domain logic, zero I/O.
//!
//! This module contains the business rules of the vial controller:
//! actuator coordination, the lock protocol and reactor orchestration.
//! All interaction with the device happens through **port traits**
//! defined in [`ports`], keeping this layer fully testable without a
//! real unit.

pub mod cache;
pub mod commands;
pub mod controls;
pub mod events;
pub mod ports;
pub mod service;
