//! `vigil-protocol` — wire types shared by the agent and relay legs.
//!
//! Messages are single JSON objects (UTF-8, one per WS text frame) with a
//! `type` discriminator. Three families:
//!
//! | Direction        | Types                                                        |
//! |------------------|--------------------------------------------------------------|
//! | Agent → Relay    | `status_update`, `alert`, `command_result`, `preview_frame`, `ping` |
//! | Relay → Agent    | `connected`, `command`, `pong`                               |
//! | Relay → operators| `RelayEvent` fan-out (admin WS and SSE share the payload)    |
//!
//! Unknown inbound `type` values are not an error — the relay forwards them
//! to the fan-out bus verbatim, so new agent versions can ship new telemetry
//! without a relay upgrade.

pub mod frames;
pub mod telemetry;

pub use frames::{AgentMessage, RawFrame, RelayEvent, RelayMessage};
pub use telemetry::TelemetrySnapshot;
