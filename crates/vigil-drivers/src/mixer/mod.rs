//! Audio mixer drivers — three OSC console families behind one interface.
//!
//! Vendor quirks stay private to each implementation:
//!
//! * **X-series** (Behringer/Midas, UDP 10023) — 2-digit channel addresses,
//!   mute polarity "1 = active", subscription keepalive `/xremote` every 9 s.
//! * **A&H series** (UDP 51326) — mute polarity "1 = muted", the inverse of
//!   X-series; normalised here so `mute_channel(n, true)` always mutes.
//! * **Yamaha** (UDP 8765) — partial OSC surface; unsupported methods
//!   succeed vacuously with a capability warning so a mixed command chain
//!   never fails outright.
//!
//! The factory keys off the `type` field of the config entry.

pub mod ahseries;
pub(crate) mod endpoint;
pub mod osc;
pub mod xseries;
pub mod yamaha;

use async_trait::async_trait;
use tokio::sync::mpsc;

use vigil_core::config::MixerEntry;
use vigil_protocol::telemetry::MixerStatus;

use crate::error::{DriverError, Result};
use crate::event::DeviceEvent;
use crate::DeviceDriver;

/// Capability surface shared by all mixer families.
#[async_trait]
pub trait MixerDriver: DeviceDriver {
    /// Mute (`true`) or unmute a channel. Implementations translate to the
    /// vendor's polarity; callers never see it.
    async fn mute_channel(&self, channel: u16, mute: bool) -> Result<()>;

    /// Set a channel fader, 0.0–1.0.
    async fn set_channel_fader(&self, channel: u16, level: f64) -> Result<()>;

    async fn set_main_mute(&self, mute: bool) -> Result<()>;

    async fn set_main_fader(&self, level: f64) -> Result<()>;

    fn status(&self) -> MixerStatus;
}

/// Build the right driver for a config entry. Unknown kinds are a config
/// error, not a runtime fallback.
pub fn create(
    entry: &MixerEntry,
    events: mpsc::Sender<DeviceEvent>,
) -> Result<Box<dyn MixerDriver>> {
    match entry.kind.to_ascii_lowercase().as_str() {
        "behringer" | "midas" | "x32" | "m32" => Ok(Box::new(xseries::XSeries::new(
            &entry.host,
            entry.port.unwrap_or(xseries::DEFAULT_PORT),
            events,
        ))),
        "allenheath" | "sq" | "avantis" => Ok(Box::new(ahseries::AhSeries::new(
            &entry.host,
            entry.port.unwrap_or(ahseries::DEFAULT_PORT),
            events,
        ))),
        "yamaha" | "tf" | "cl" => Ok(Box::new(yamaha::Yamaha::new(
            &entry.host,
            entry.port.unwrap_or(yamaha::DEFAULT_PORT),
            events,
        ))),
        other => Err(DriverError::InvalidArgument(format!(
            "unknown mixer type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &str) -> MixerEntry {
        MixerEntry {
            kind: kind.to_string(),
            host: "127.0.0.1".to_string(),
            port: None,
        }
    }

    #[test]
    fn factory_maps_vendor_aliases() {
        let (tx, _rx) = mpsc::channel(4);
        for kind in ["behringer", "Midas", "allenheath", "SQ", "yamaha", "tf"] {
            assert!(create(&entry(kind), tx.clone()).is_ok(), "kind {kind}");
        }
    }

    #[test]
    fn factory_rejects_unknown_kind() {
        let (tx, _rx) = mpsc::channel(4);
        assert!(matches!(
            create(&entry("mackie"), tx),
            Err(DriverError::InvalidArgument(_))
        ));
    }
}
