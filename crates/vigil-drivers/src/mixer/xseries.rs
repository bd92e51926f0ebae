//! X-series console driver (Behringer X32 family, Midas M32).
//!
//! Channel addresses use 2-digit indices (`/ch/01/mix/on`). Mute polarity is
//! "1 = active": sending 0 mutes. The console only pushes change
//! notifications while an `/xremote` subscription is alive, and the
//! subscription expires after 10 s — so it is re-sent every 9 s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

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

pub const DEFAULT_PORT: u16 = 10023;
const XREMOTE_INTERVAL: Duration = Duration::from_secs(9);

const MAIN_MUTE: &str = "/main/st/mix/on";
const MAIN_FADER: &str = "/main/st/mix/fader";

#[derive(Debug, Default)]
struct State {
    main_muted: bool,
    main_fader: f64,
}

pub struct XSeries {
    endpoint: Arc<OscEndpoint>,
    state: Arc<Mutex<State>>,
    shutdown: Arc<AtomicBool>,
    events: mpsc::Sender<DeviceEvent>,
}

impl XSeries {
    pub fn new(host: &str, port: u16, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            endpoint: Arc::new(OscEndpoint::new(host, port)),
            state: Arc::new(Mutex::new(State::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    fn channel_addr(channel: u16, leaf: &str) -> String {
        format!("/ch/{channel:02}/mix/{leaf}")
    }

    fn apply(state: &Mutex<State>, msg: &OscMessage) {
        let mut state = state.lock().unwrap();
        match msg.addr.as_str() {
            MAIN_MUTE => {
                if let Some(on) = msg.first_int() {
                    state.main_muted = on == 0;
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
impl DeviceDriver for XSeries {
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

        // Receive loop: update the local mirror from pushed changes.
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
                            Err(e) => debug!(error = %e, "xseries: undecodable datagram"),
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "xseries: recv failed");
                        break;
                    }
                }
            }
        });

        // Subscription keepalive — the console drops it after 10 s.
        let endpoint = Arc::clone(&self.endpoint);
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(XREMOTE_INTERVAL);
            loop {
                tick.tick().await;
                if shutdown.load(Ordering::Relaxed) || !endpoint.connected() {
                    break;
                }
                if let Err(e) = endpoint.send(&OscMessage::new("/xremote")).await {
                    warn!(error = %e, "xseries: xremote keepalive failed");
                }
            }
        });

        // Prime the mirror.
        let _ = self.endpoint.send(&OscMessage::new(MAIN_MUTE)).await;
        let _ = self.endpoint.send(&OscMessage::new(MAIN_FADER)).await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.endpoint.disconnect();
    }

    async fn is_reachable(&self) -> bool {
        self.endpoint.probe(OscMessage::new("/info")).await
    }

    fn connected(&self) -> bool {
        self.endpoint.connected()
    }
}

#[async_trait]
impl MixerDriver for XSeries {
    async fn mute_channel(&self, channel: u16, mute: bool) -> Result<()> {
        // Polarity: 1 = active, 0 = muted.
        self.endpoint
            .send(&OscMessage::new(Self::channel_addr(channel, "on")).int(i32::from(!mute)))
            .await
    }

    async fn set_channel_fader(&self, channel: u16, level: f64) -> Result<()> {
        self.endpoint
            .send(
                &OscMessage::new(Self::channel_addr(channel, "fader"))
                    .float(level.clamp(0.0, 1.0) as f32),
            )
            .await
    }

    async fn set_main_mute(&self, mute: bool) -> Result<()> {
        self.endpoint
            .send(&OscMessage::new(MAIN_MUTE).int(i32::from(!mute)))
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
            kind: "behringer".to_string(),
            main_muted: state.main_muted,
            main_fader: state.main_fader,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_addresses_are_two_digit() {
        assert_eq!(XSeries::channel_addr(1, "on"), "/ch/01/mix/on");
        assert_eq!(XSeries::channel_addr(16, "fader"), "/ch/16/mix/fader");
    }

    #[test]
    fn pushed_main_mute_uses_active_polarity() {
        let state = Mutex::new(State::default());
        // 0 = muted on this family.
        XSeries::apply(&state, &OscMessage::new(MAIN_MUTE).int(0));
        assert!(state.lock().unwrap().main_muted);
        XSeries::apply(&state, &OscMessage::new(MAIN_MUTE).int(1));
        assert!(!state.lock().unwrap().main_muted);
    }

    #[test]
    fn pushed_fader_updates_state() {
        let state = Mutex::new(State::default());
        XSeries::apply(&state, &OscMessage::new(MAIN_FADER).float(0.8));
        assert!((state.lock().unwrap().main_fader - 0.8).abs() < 1e-6);
    }
}
