//! Fuzz target: `LineDecoder`
//!
//! Drives arbitrary byte sequences into the streaming line decoder and
//! asserts that it never panics, never buffers past a line's end, and
//! recovers cleanly after a reset.
//!
//! cargo fuzz run fuzz_line_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use vialctl::rpc::codec::{LineDecoder, MAX_LINE_LEN};

fuzz_target!(|data: &[u8]| {
    let mut decoder = LineDecoder::new();

    // Split the input at its first byte so chunk boundaries vary too.
    let cut = data.first().map_or(0, |&b| usize::from(b).min(data.len()));
    let (head, tail) = data.split_at(cut);
    for chunk in [head, tail] {
        decoder.push(chunk);
        while decoder.next_message().is_some() {}
    }

    // Whatever is left cannot contain a newline and is bounded.
    assert!(decoder.pending() <= MAX_LINE_LEN + data.len());

    decoder.reset();
    assert_eq!(decoder.pending(), 0);
    decoder.push(b"{\"event\":\"broadcast\",\"payload\":{}}\n");
    assert!(matches!(decoder.next_message(), Some(Ok(_))), "decoder must recover after reset");
});
