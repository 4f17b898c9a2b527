//! Fuzz target: inbound message decoding
//!
//! Arbitrary JSON lines are decoded as wire messages and then as device
//! events.  A decoded broadcast's accessors must not panic on whatever
//! readings and config echoes it carries.
//!
//! cargo fuzz run fuzz_inbound

#![no_main]

use libfuzzer_sys::fuzz_target;
use vialctl::rpc::codec::decode_line;
use vialctl::rpc::inbound::{Inbound, config_keys};

fuzz_target!(|data: &[u8]| {
    let Ok(line) = core::str::from_utf8(data) else {
        return;
    };
    let Ok(msg) = decode_line(line) else {
        return;
    };
    if let Ok(Inbound::Broadcast(b)) = Inbound::decode(&msg) {
        let _ = b.pump_values();
        let _ = b.config_values(config_keys::TEMP);
        for sensor in b.data.keys() {
            let _ = b.reading(sensor, 0);
        }
    }
});
