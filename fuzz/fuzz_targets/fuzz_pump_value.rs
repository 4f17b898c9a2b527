//! Fuzz target: pump slot parsing
//!
//! Feeds arbitrary text to `PumpValue::parse` and whole pump vectors to
//! `PumpCommandVector::decode`.  Anything accepted must carry a finite,
//! non-negative duration and a positive period.
//!
//! cargo fuzz run fuzz_pump_value

#![no_main]

use libfuzzer_sys::fuzz_target;
use vialctl::rpc::command::{PumpCommandVector, PumpValue};

fn check(value: &PumpValue) {
    assert!(value.secs().is_finite() && value.secs() >= 0.0, "{value:?}");
    if let PumpValue::Recurring { period, .. } = value {
        assert!(period.is_finite() && *period > 0.0, "{value:?}");
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };

    if let Ok(value) = PumpValue::parse(text) {
        check(&value);
    }

    let slots: Vec<&str> = text.split(',').collect();
    if slots.len() % 3 == 0 {
        if let Ok(vector) = PumpCommandVector::decode(&slots, slots.len() / 3) {
            vector.values().iter().for_each(check);
        }
    }
});
