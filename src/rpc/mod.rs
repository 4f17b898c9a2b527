//! Device wire protocol.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       Device link                          │
//! │                                                            │
//! │  ┌───────────┐   ┌─────────┐   ┌────────────────────────┐  │
//! │  │ Transport │──▶│  codec  │──▶│ inbound channel        │──┼─▶ AppService
//! │  │ (trait)   │   │ (JSON)  │   │ Broadcast / calib resp │  │
//! │  └───────────┘   └─────────┘   └────────────────────────┘  │
//! │        ▲                                                   │
//! │        │         ┌─────────┐   ┌────────────────────────┐  │
//! │        └─────────│  codec  │◀──│ outbound channel       │◀─┼── Controls
//! │                  └─────────┘   │ Command                │  │
//! │                                └────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod codec;
pub mod command;
pub mod inbound;
pub mod link;
pub mod transport;

use serde::{Deserialize, Serialize};

/// One message on the wire: an event name and its JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}
