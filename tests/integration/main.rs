//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters.  All tests run on the host with no device
//! attached.

mod calibration_query_tests;
mod chemostat_tests;
mod controls_tests;
mod mock_link;
mod replay_tests;
