//! A&H-series console driver (SQ, Avantis).
//!
//! Mute polarity is the inverse of the X-series: "1 = muted". The driver
//! normalises at the boundary so `mute_channel(n, true)` always mutes,
//! whatever the family. No subscription protocol — the console answers
//! queries but does not push changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use vigil_protocol::telemetry::MixerStatus;

use crate::error::Result;
use crate::event::DeviceEvent;
use crate::DeviceDriver;

use super::endpoint::OscEndpoint;
use super::osc::OscMessage;
use super::MixerDriver;

pub const DEFAULT_PORT: u16 = 51326;

const MAIN_MUTE: &str = "/main/mute";
const MAIN_FADER: &str = "/main/fader";

#[derive(Debug, Default)]
struct State {
    main_muted: bool,
    main_fader: f64,
}

pub struct AhSeries {
    endpoint: Arc<OscEndpoint>,
    state: Arc<Mutex<State>>,
    shutdown: Arc<AtomicBool>,
    events: mpsc::Sender<DeviceEvent>,
}

impl AhSeries {
    pub fn new(host: &str, port: u16, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            endpoint: Arc::new(OscEndpoint::new(host, port)),
            state: Arc::new(Mutex::new(State::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    fn apply(state: &Mutex<State>, msg: &OscMessage) {
        let mut state = state.lock().unwrap();
        match msg.addr.as_str() {
            // Polarity: 1 = muted.
            MAIN_MUTE => {
                if let Some(v) = msg.first_int() {
                    state.main_muted = v != 0;
                }
            }
            MAIN_FADER => {
                if let Some(level) = msg.first_float() {
                    state.main_fader = f64::from(level);
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl DeviceDriver for AhSeries {
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
                        match OscMessage::parse(&buf[..n]) {
                            Ok(msg) => Self::apply(&state, &msg),
                            Err(e) => debug!(error = %e, "ahseries: undecodable datagram"),
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "ahseries: recv failed");
                        break;
                    }
                }
            }
        });

        let _ = self.endpoint.send(&OscMessage::new(MAIN_MUTE)).await;
        let _ = self.endpoint.send(&OscMessage::new(MAIN_FADER)).await;
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
impl MixerDriver for AhSeries {
    async fn mute_channel(&self, channel: u16, mute: bool) -> Result<()> {
        // Polarity: 1 = muted — no inversion on this family.
        self.endpoint
            .send(&OscMessage::new(format!("/ch/{channel}/mute")).int(i32::from(mute)))
            .await
    }

    async fn set_channel_fader(&self, channel: u16, level: f64) -> Result<()> {
        self.endpoint
            .send(&OscMessage::new(format!("/ch/{channel}/fader")).float(level.clamp(0.0, 1.0) as f32))
            .await
    }

    async fn set_main_mute(&self, mute: bool) -> Result<()> {
        self.endpoint
            .send(&OscMessage::new(MAIN_MUTE).int(i32::from(mute)))
            .await?;
        self.state.lock().unwrap().main_muted = mute;
        Ok(())
    }

    async fn set_main_fader(&self, level: f64) -> Result<()> {
        let level = level.clamp(0.0, 1.0);
        self.endpoint
            .send(&OscMessage::new(MAIN_FADER).float(level as f32))
            .await?;
        self.state.lock().unwrap().main_fader = level;
        Ok(())
    }

    fn status(&self) -> MixerStatus {
        let state = self.state.lock().unwrap();
        MixerStatus {
            connected: self.endpoint.connected(),
            kind: "allenheath".to_string(),
            main_muted: state.main_muted,
            main_fader: state.main_fader,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushed_main_mute_uses_muted_polarity() {
        let state = Mutex::new(State::default());
        // 1 = muted on this family — inverted relative to X-series.
        AhSeries::apply(&state, &OscMessage::new(MAIN_MUTE).int(1));
        assert!(state.lock().unwrap().main_muted);
        AhSeries::apply(&state, &OscMessage::new(MAIN_MUTE).int(0));
        assert!(!state.lock().unwrap().main_muted);
    }
}
