//! JSON-lines transport adapter.
//!
//! Implements [`Transport`] over any reader/writer pair, one wire message
//! per line.  The binary replays a recorded device session from a file
//! and writes the commands it would have sent.
//!
//! `recv` returns `None` once the reader is exhausted.  Malformed lines
//! are logged and skipped.

use std::io::{Read, Write};

use log::warn;

use crate::error::{Error, Result};
use crate::rpc::WireMessage;
use crate::rpc::codec::{LineDecoder, encode_line};
use crate::rpc::transport::Transport;

const READ_CHUNK: usize = 4096;

pub struct JsonLinesTransport<R, W> {
    reader: R,
    writer: W,
    decoder: LineDecoder,
    eof: bool,
    skipped: u64,
}

impl<R: Read, W: Write> JsonLinesTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            decoder: LineDecoder::new(),
            eof: false,
            skipped: 0,
        }
    }

    /// Malformed lines skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// The reader is exhausted and every buffered line has been consumed.
    pub fn is_drained(&self) -> bool {
        self.eof && self.decoder.pending() == 0
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.reader.read(&mut chunk).map_err(io_error)?;
        if n == 0 {
            self.eof = true;
            // A last line without a trailing newline still counts.
            if self.decoder.pending() > 0 {
                self.decoder.push(b"\n");
            }
        } else {
            self.decoder.push(&chunk[..n]);
        }
        Ok(())
    }
}

impl<R: Read, W: Write> Transport for JsonLinesTransport<R, W> {
    type Error = Error;

    fn recv(&mut self) -> Result<Option<WireMessage>> {
        loop {
            match self.decoder.next_message() {
                Some(Ok(msg)) => return Ok(Some(msg)),
                Some(Err(e)) => {
                    self.skipped += 1;
                    warn!("skipping malformed line: {e}");
                }
                None if self.eof => return Ok(None),
                None => self.fill()?,
            }
        }
    }

    fn send(&mut self, msg: &WireMessage) -> Result<()> {
        let line = encode_line(msg)?;
        self.writer.write_all(line.as_bytes()).map_err(io_error)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(io_error)
    }
}

fn io_error(e: std::io::Error) -> Error {
    Error::Transport(e.to_string())
}
