//! `vigil-drivers` — protocol adaptors for venue production hardware.
//!
//! Every driver exposes the same capability surface to the agent:
//! [`DeviceDriver`] (connect / disconnect / reachability / status) plus
//! typed command methods specific to the device class. Protocols vary
//! wildly underneath:
//!
//! | Driver      | Transport                  | Notes                              |
//! |-------------|----------------------------|------------------------------------|
//! | `Switcher`  | TCP 9910, binary, stateful | event-driven state mirror          |
//! | `Router`    | TCP 9990, text blocks      | pending-query correlation, ACK/NAK |
//! | `mixer::*`  | UDP OSC (3 families)       | vendor mute polarity quirks        |
//! | `Streamer`  | WebSocket JSON-RPC         | call/reply + push state events     |
//! | `Slides`    | HTTP REST + WS push        | `stagedisplay` slide-change feed   |
//! | `Visuals`   | HTTP REST                  | 5 s composition cache, fuzzy lookup|
//! | `MacroHost` | HTTP REST                  | fuzzy button press by rendered text|
//!
//! Two rules hold everywhere: poll errors never propagate (they mark the
//! device disconnected and are retried on the per-device backoff), and every
//! driver produces a JSON-serialisable status section for the telemetry
//! snapshot.

pub mod backoff;
pub mod error;
pub mod event;
pub mod macrohost;
pub mod mixer;
pub mod router;
pub mod slides;
pub mod streamer;
pub mod switcher;
pub mod visuals;

use async_trait::async_trait;

pub use backoff::Backoff;
pub use error::{DriverError, Result};
pub use event::DeviceEvent;

/// Uniform capability set every device driver exposes to the agent.
///
/// `connect` and `disconnect` are idempotent. `is_reachable` is a
/// lightweight probe bounded at 3 s and must never hang longer.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Short device class name used in logs and status keys.
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    async fn is_reachable(&self) -> bool;

    /// Current transport state without touching the network.
    fn connected(&self) -> bool;
}
