//! Newline-delimited JSON codec.
//!
//! Wire format, one message per line:
//! ```text
//! {"event":"broadcast","payload":{...}}\n
//! {"event":"command","payload":{"param":"pump",...}}\n
//! ```
//!
//! The decoder accumulates incoming bytes and yields complete lines.
//! This handles partial reads: a single read may return part of a line
//! or several lines concatenated.

use crate::error::{Error, Result};

use super::WireMessage;

/// Longest accepted line (protects against memory exhaustion).
pub const MAX_LINE_LEN: usize = 256 * 1024;

/// Streaming line decoder.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    /// Set while skipping the rest of an overlong line.
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete message, if a full line has arrived.
    ///
    /// Blank lines are skipped.  A malformed or overlong line yields an
    /// error and is consumed, so decoding can continue after it.
    pub fn next_message(&mut self) -> Option<Result<WireMessage>> {
        loop {
            let Some(end) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_LINE_LEN {
                    self.buf.clear();
                    self.discarding = true;
                    return Some(Err(Error::Protocol(format!(
                        "line exceeds {MAX_LINE_LEN} bytes"
                    ))));
                }
                return None;
            };
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() > MAX_LINE_LEN {
                return Some(Err(Error::Protocol(format!("line exceeds {MAX_LINE_LEN} bytes"))));
            }
            let Ok(text) = core::str::from_utf8(&line) else {
                return Some(Err(Error::Protocol("line is not valid UTF-8".into())));
            };
            if text.trim().is_empty() {
                continue;
            }
            return Some(decode_line(text));
        }
    }

    /// Bytes buffered but not yet part of a complete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial line (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }
}

/// Decode one line (without or with its trailing newline).
pub fn decode_line(line: &str) -> Result<WireMessage> {
    serde_json::from_str(line.trim()).map_err(|e| Error::Protocol(format!("bad wire message: {e}")))
}

/// Encode one message as a line, including the trailing newline.
pub fn encode_line(msg: &WireMessage) -> Result<String> {
    let mut line = serde_json::to_string(msg).map_err(|e| Error::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reads_reassemble() {
        let mut d = LineDecoder::new();
        d.push(br#"{"event":"broad"#);
        assert!(d.next_message().is_none());
        d.push(b"cast\",\"payload\":{}}\n\n{\"event\":\"x\"}\n");
        assert_eq!(d.next_message().unwrap().unwrap().event, "broadcast");
        assert_eq!(d.next_message().unwrap().unwrap().event, "x");
        assert!(d.next_message().is_none());
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn garbage_line_does_not_block_the_next() {
        let mut d = LineDecoder::new();
        d.push(b"not json\n{\"event\":\"ok\"}\n");
        assert!(d.next_message().unwrap().is_err());
        assert_eq!(d.next_message().unwrap().unwrap().event, "ok");
    }

    #[test]
    fn encode_is_one_line() {
        let msg = WireMessage {
            event: "getactivecal".into(),
            payload: serde_json::json!({}),
        };
        let line = encode_line(&msg).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_line(&line).unwrap(), msg);
    }
}
