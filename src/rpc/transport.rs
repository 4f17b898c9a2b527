//! Transport abstraction — any channel that carries wire messages.
//!
//! Concrete implementations:
//! - JSON lines over any reader/writer pair (replay files, pipes, sockets),
//!   see [`crate::adapters::json_lines`]
//!
//! The device link is generic over `Transport`, so adding a new
//! transport requires zero changes to the control logic.

use core::fmt;

use super::WireMessage;

/// Message-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: fmt::Debug + fmt::Display;

    /// Next inbound message, or `None` if nothing is available (non-blocking).
    fn recv(&mut self) -> Result<Option<WireMessage>, Self::Error>;

    /// Queue `msg` for delivery.
    fn send(&mut self, msg: &WireMessage) -> Result<(), Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;
}
