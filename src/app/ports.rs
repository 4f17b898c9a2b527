//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Controls / AppService (domain)
//! ```
//!
//! Driven adapters (device link, clock, event sinks) implement these
//! traits.  The domain consumes them through generics injected at call
//! sites, so the controller never touches a socket or a timer directly.

use core::time::Duration;

use crate::error::Result;
use crate::rpc::command::Command;
use crate::rpc::inbound::Inbound;

// ───────────────────────────────────────────────────────────────
// Command sink (driven adapter: domain → device)
// ───────────────────────────────────────────────────────────────

/// Write-side port: every command for the device goes through here.
///
/// Fire-and-forget.  A successful `submit` means the command was accepted
/// for delivery, not that the device acted on it.
pub trait CommandSink {
    fn submit(&mut self, cmd: Command) -> Result<()>;

    /// Push queued commands out now.  Needed before waiting on a reply.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects commands in memory.  Used by tests and dry runs.
impl CommandSink for Vec<Command> {
    fn submit(&mut self, cmd: Command) -> Result<()> {
        self.push(cmd);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Inbound source (driving adapter: device → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: broadcasts and calibration responses.
pub trait InboundSource {
    /// Next decoded message, or `None` if nothing is pending (non-blocking).
    fn poll(&mut self) -> Result<Option<Inbound>>;
}

// ───────────────────────────────────────────────────────────────
// Clock (bounded waits)
// ───────────────────────────────────────────────────────────────

/// Monotonic time for the calibration busy-wait helpers.
pub trait Clock {
    /// Seconds since an arbitrary fixed origin.
    fn now_secs(&self) -> f64;

    /// Block the calling thread.
    fn sleep(&mut self, dur: Duration);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (log, data file,
/// dashboard).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}
