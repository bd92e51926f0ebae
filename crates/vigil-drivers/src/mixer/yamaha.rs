//! Yamaha console driver (TF/CL families).
//!
//! The OSC surface on these desks is partial: channel and main mutes are
//! dependable, fader moves over OSC are not. Unsupported methods succeed
//! vacuously with a capability warning — a chained command ("mute the band
//! and pull the master down") must not fail halfway because one leg of it
//! isn't available on this desk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vigil_protocol::telemetry::MixerStatus;

use crate::error::Result;
use crate::event::DeviceEvent;
use crate::DeviceDriver;

use super::endpoint::OscEndpoint;
use super::osc::OscMessage;
use super::MixerDriver;

pub const DEFAULT_PORT: u16 = 8765;

const MAIN_MUTE: &str = "/main/on";

#[derive(Debug, Default)]
struct State {
    main_muted: bool,
}

pub struct Yamaha {
    endpoint: Arc<OscEndpoint>,
    state: Arc<Mutex<State>>,
    shutdown: Arc<AtomicBool>,
    events: mpsc::Sender<DeviceEvent>,
}

impl Yamaha {
    pub fn new(host: &str, port: u16, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            endpoint: Arc::new(OscEndpoint::new(host, port)),
            state: Arc::new(Mutex::new(State::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
            events,
        }
    }
}

#[async_trait]
impl DeviceDriver for Yamaha {
    fn name(&self) -> &'static str {
        "mixer"
    }

    async fn connect(&self) -> Result<()> {
        if self.endpoint.connected() {
            return Ok(());
        }
        self.shutdown.store(false, Ordering::Relaxed);
        let socket = self.endpoint.connect().await?;
        let _ = self.events.send(DeviceEvent::Connected { device: "mixer" }).await;

        let endpoint = Arc::clone(&self.endpoint);
        let state = Arc::clone(&self.state);
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            while !shutdown.load(Ordering::Relaxed) {
                match socket.recv(&mut buf).await {
                    Ok(n) => {
                        endpoint.touch_rx();
                        if let Ok(msg) = OscMessage::parse(&buf[..n]) {
                            if msg.addr == MAIN_MUTE {
                                if let Some(v) = msg.first_int() {
                                    state.lock().unwrap().main_muted = v == 0;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "yamaha: recv failed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.endpoint.disconnect();
    }

    async fn is_reachable(&self) -> bool {
        self.endpoint.probe(OscMessage::new(MAIN_MUTE)).await
    }

    fn connected(&self) -> bool {
        self.endpoint.connected()
    }
}

#[async_trait]
impl MixerDriver for Yamaha {
    async fn mute_channel(&self, channel: u16, mute: bool) -> Result<()> {
        // "on" polarity: 1 = active, 0 = muted.
        self.endpoint
            .send(&OscMessage::new(format!("/ch/{channel}/on")).int(i32::from(!mute)))
            .await
    }

    async fn set_channel_fader(&self, _channel: u16, _level: f64) -> Result<()> {
        warn!("yamaha: channel faders are not controllable over OSC on this desk; ignoring");
        Ok(())
    }

    async fn set_main_mute(&self, mute: bool) -> Result<()> {
        self.endpoint
            .send(&OscMessage::new(MAIN_MUTE).int(i32::from(!mute)))
            .await?;
        self.state.lock().unwrap().main_muted = mute;
        Ok(())
    }

    async fn set_main_fader(&self, _level: f64) -> Result<()> {
        warn!("yamaha: main fader is not controllable over OSC on this desk; ignoring");
        Ok(())
    }

    fn status(&self) -> MixerStatus {
        let state = self.state.lock().unwrap();
        MixerStatus {
            connected: self.endpoint.connected(),
            kind: "yamaha".to_string(),
            main_muted: state.main_muted,
            // Not readable on this family; reported as nominal.
            main_fader: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_fader_methods_succeed_vacuously() {
        let (tx, _rx) = mpsc::channel(4);
        let desk = Yamaha::new("127.0.0.1", DEFAULT_PORT, tx);
        // Never connected, yet these must not error — a chained command
        // relies on the vacuous success.
        assert!(desk.set_channel_fader(3, 0.5).await.is_ok());
        assert!(desk.set_main_fader(0.5).await.is_ok());
    }
}
