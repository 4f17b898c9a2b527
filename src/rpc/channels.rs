//! Inbound/outbound message channels.
//!
//! Uses `embassy-sync` bounded channels to decouple the transport from
//! the control loop.  The loop is single-threaded, so the channels use
//! the no-op mutex and live inside the [`DeviceLink`](super::link::DeviceLink)
//! that owns them rather than in statics.
//!
//! ```text
//! ┌──────────────┐   Inbound    ┌──────────────┐
//! │  Transport   │────────────▶│ Control Loop  │
//! │              │◀────────────│               │
//! └──────────────┘   Command    └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;

use super::command::Command;
use super::inbound::Inbound;

/// Channel depth for inbound messages.
pub const INBOUND_DEPTH: usize = 8;

/// Channel depth for outbound commands.
pub const OUTBOUND_DEPTH: usize = 16;

/// Transport → control loop.
pub type InboundChannel = Channel<NoopRawMutex, Inbound, INBOUND_DEPTH>;

/// Control loop → transport.
pub type OutboundChannel = Channel<NoopRawMutex, Command, OUTBOUND_DEPTH>;
