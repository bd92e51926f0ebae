//! Agent runtime — owns the device drivers and the shared monitor state.
//!
//! All background work (relay connection, status broadcast, watchdog,
//! silence/health monitors, preview pump) runs in supervised tasks that
//! borrow the runtime through an `Arc`. Devices that fail to connect at
//! startup are retried on their own backoff — a dark switcher never stops
//! the agent from serving the rest of the room.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vigil_core::config::AgentConfig;
use vigil_core::types::Severity;
use vigil_protocol::frames::AgentMessage;
use vigil_protocol::telemetry::{AudioStatus, StreamHealthStatus, SystemStatus, TelemetrySnapshot};

use vigil_drivers::macrohost::MacroHost;
use vigil_drivers::mixer::{self, MixerDriver};
use vigil_drivers::router::Router;
use vigil_drivers::slides::Slides;
use vigil_drivers::streamer::Streamer;
use vigil_drivers::switcher::Switcher;
use vigil_drivers::{Backoff, DeviceDriver, DeviceEvent};

pub struct AgentRuntime {
    pub config: AgentConfig,
    pub switcher: Option<Switcher>,
    pub routers: Vec<Router>,
    pub mixer: Option<Arc<dyn MixerDriver>>,
    pub streamer: Option<Streamer>,
    pub slides: Option<Slides>,
    pub visuals: Option<vigil_drivers::visuals::Visuals>,
    pub macrohost: Option<MacroHost>,

    /// Outbound leg to the relay connection task.
    pub outbound: mpsc::Sender<AgentMessage>,
    /// Alert dedup windows, keyed by alert type. Cleared on device
    /// reconnect so a fresh failure alerts immediately.
    pub alert_dedup: DashMap<String, Instant>,
    /// Preview pump switch, flipped by `preview.start` / `preview.stop`.
    pub preview_enabled: AtomicBool,
    /// Shared monitor state folded into the telemetry snapshot.
    pub audio_state: Mutex<AudioStatus>,
    pub health_state: Mutex<StreamHealthStatus>,

    started_at: Instant,
}

impl AgentRuntime {
    /// Build drivers from config. Nothing connects yet — `start` wires the
    /// event pump and per-device connect loops.
    pub fn new(config: AgentConfig, outbound: mpsc::Sender<AgentMessage>, events: mpsc::Sender<DeviceEvent>) -> Self {
        let switcher = config
            .switcher_ip
            .as_deref()
            .map(|ip| Switcher::new(ip, events.clone()));
        let routers = config
            .video_routers
            .iter()
            .map(|r| Router::new(&r.host, r.port, r.label.clone(), events.clone()))
            .collect();
        let mixer = config.mixer.as_ref().and_then(|entry| {
            match mixer::create(entry, events.clone()) {
                Ok(driver) => Some(Arc::from(driver)),
                Err(e) => {
                    warn!(kind = %entry.kind, "mixer config rejected: {e}");
                    None
                }
            }
        });
        let streamer = config.streamer_url.as_deref().map(|url| {
            Streamer::new(url, config.streamer_password.clone(), events.clone())
        });
        let slides = match (config.slides_host.as_deref(), config.slides_port) {
            (Some(host), Some(port)) => Some(Slides::new(host, port, events.clone())),
            (Some(host), None) => Some(Slides::new(host, 1025, events.clone())),
            _ => None,
        };
        let visuals = match (
            config.visual_server_host.as_deref(),
            config.visual_server_port,
        ) {
            (Some(host), port) => Some(vigil_drivers::visuals::Visuals::new(
                host,
                port.unwrap_or(8080),
                events.clone(),
            )),
            _ => None,
        };
        let macrohost = config
            .macrohost_url
            .as_deref()
            .map(|url| MacroHost::new(url, events));

        Self {
            config,
            switcher,
            routers,
            mixer,
            streamer,
            slides,
            visuals,
            macrohost,
            outbound,
            alert_dedup: DashMap::new(),
            preview_enabled: AtomicBool::new(false),
            audio_state: Mutex::new(AudioStatus::default()),
            health_state: Mutex::new(StreamHealthStatus::default()),
            started_at: Instant::now(),
        }
    }

    /// Kick off per-device connect loops and the device event pump.
    pub fn start(self: Arc<Self>, events_rx: mpsc::Receiver<DeviceEvent>) {
        if let Some(sw) = &self.switcher {
            spawn_connect(sw.clone());
        }
        for router in &self.routers {
            spawn_connect(router.clone());
        }
        if let Some(mixer) = &self.mixer {
            let mixer = Arc::clone(mixer);
            tokio::spawn(async move {
                let mut backoff = Backoff::device();
                while let Err(e) = mixer.connect().await {
                    let delay = backoff.next_delay();
                    warn!(device = mixer.name(), error = %e, delay_secs = delay.as_secs(), "connect failed");
                    tokio::time::sleep(delay).await;
                }
            });
        }
        if let Some(streamer) = &self.streamer {
            spawn_connect(streamer.clone());
        }
        if let Some(slides) = &self.slides {
            spawn_connect(slides.clone());
        }
        if let Some(visuals) = &self.visuals {
            spawn_connect(visuals.clone());
        }
        if let Some(macrohost) = &self.macrohost {
            spawn_connect(macrohost.clone());
        }

        tokio::spawn(self.event_pump(events_rx));
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn is_streaming(&self) -> bool {
        self.streamer
            .as_ref()
            .map(|s| s.status().streaming)
            .unwrap_or(false)
    }

    /// Assemble the full telemetry snapshot from driver mirrors.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            switcher: self.switcher.as_ref().map(|s| s.status()),
            streamer: self.streamer.as_ref().map(|s| s.status()),
            slides: self.slides.as_ref().map(|s| s.status()),
            router: self.routers.first().map(|r| r.status()),
            mixer: self.mixer.as_ref().map(|m| m.status()),
            audio: Some(self.audio_state.lock().unwrap().clone()),
            stream_health: Some(self.health_state.lock().unwrap().clone()),
            system: Some(SystemStatus {
                hostname: hostname(),
                platform: std::env::consts::OS.to_string(),
                uptime_sec: self.uptime_secs(),
                name: self.config.name.clone().unwrap_or_default(),
            }),
        }
    }

    /// Push a fresh `status_update` to the relay (best effort).
    pub async fn send_status(&self) {
        let _ = self
            .outbound
            .send(AgentMessage::StatusUpdate {
                status: self.snapshot(),
            })
            .await;
    }

    /// Emit an alert if the dedup window for `alert_type` allows it.
    pub async fn emit_alert(
        &self,
        alert_type: &str,
        severity: Severity,
        message: String,
        window: Duration,
    ) -> bool {
        if !dedup_allows(&self.alert_dedup, alert_type, window) {
            return false;
        }
        info!(alert_type, %severity, "alert emitted");
        let _ = self
            .outbound
            .send(AgentMessage::Alert {
                message,
                severity,
                alert_type: Some(alert_type.to_string()),
                context: None,
            })
            .await;
        true
    }

    /// Device event pump: fold pushed changes into alerts and fresh
    /// telemetry. Stream/record transitions are the agent's to announce —
    /// the relay only ever sees typed alerts.
    async fn event_pump(self: Arc<Self>, mut events: mpsc::Receiver<DeviceEvent>) {
        let mut was_streaming = false;
        while let Some(event) = events.recv().await {
            match &event {
                DeviceEvent::Connected { device } => {
                    // A fresh failure after a reconnect must alert
                    // immediately, so the dedup window for this device dies
                    // with the outage.
                    let stale = format!("{device}_disconnected");
                    self.alert_dedup.remove(&stale);
                    info!(device, "device connected");
                }
                DeviceEvent::Disconnected { device } => {
                    warn!(device, "device disconnected");
                }
                DeviceEvent::StreamStateChanged { streaming } => {
                    if *streaming && !was_streaming {
                        self.emit_alert(
                            "stream_started",
                            Severity::Info,
                            "Stream started".to_string(),
                            Duration::from_secs(0),
                        )
                        .await;
                    } else if !*streaming && was_streaming {
                        self.emit_alert(
                            "stream_stopped",
                            Severity::Critical,
                            "Stream stopped".to_string(),
                            Duration::from_secs(0),
                        )
                        .await;
                    }
                    was_streaming = *streaming;
                }
                DeviceEvent::RecordStateChanged { recording } => {
                    if *recording {
                        self.emit_alert(
                            "recording_started",
                            Severity::Info,
                            "Recording started".to_string(),
                            Duration::from_secs(0),
                        )
                        .await;
                    }
                }
                DeviceEvent::SwitcherState
                | DeviceEvent::RouteChanged { .. }
                | DeviceEvent::SlideChanged { .. } => {}
            }
            // Any device change refreshes the relay's picture out of cycle.
            self.send_status().await;
        }
    }
}

/// `true` when `key` is outside its dedup window; records the hit.
pub fn dedup_allows(map: &DashMap<String, Instant>, key: &str, window: Duration) -> bool {
    let now = Instant::now();
    if let Some(last) = map.get(key) {
        if now.duration_since(*last) < window {
            return false;
        }
    }
    map.insert(key.to_string(), now);
    true
}

fn spawn_connect<D: DeviceDriver + Clone + 'static>(driver: D) {
    tokio::spawn(async move {
        let mut backoff = Backoff::device();
        while let Err(e) = driver.connect().await {
            let delay = backoff.next_delay();
            warn!(device = driver.name(), error = %e, delay_secs = delay.as_secs(), "connect failed");
            tokio::time::sleep(delay).await;
        }
    });
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Status broadcast loop: a full snapshot every 30 s.
pub async fn status_loop(rt: Arc<AgentRuntime>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(vigil_core::config::STATUS_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = interval.tick() => rt.send_status().await,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_blocks_within_window_and_reopens_after() {
        let map = DashMap::new();
        assert!(dedup_allows(&map, "fps_low", Duration::from_secs(300)));
        assert!(!dedup_allows(&map, "fps_low", Duration::from_secs(300)));
        // A different key is independent.
        assert!(dedup_allows(&map, "bitrate_low", Duration::from_secs(300)));
        // Zero-width window never blocks.
        assert!(dedup_allows(&map, "stream_started", Duration::from_secs(0)));
        assert!(dedup_allows(&map, "stream_started", Duration::from_secs(0)));
    }

    #[tokio::test]
    async fn snapshot_reflects_configured_devices_only() {
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (ev_tx, _ev_rx) = mpsc::channel(8);
        let config: AgentConfig = serde_json::from_str(
            r#"{ "name": "Main Hall", "switcherIp": "10.0.0.5" }"#,
        )
        .unwrap();
        let rt = AgentRuntime::new(config, out_tx, ev_tx);
        let snap = rt.snapshot();
        assert!(snap.switcher.is_some());
        assert!(snap.streamer.is_none());
        assert!(snap.router.is_none());
        assert_eq!(snap.system.as_ref().unwrap().name, "Main Hall");
        assert!(!snap.is_streaming());
    }

    #[tokio::test]
    async fn reconnect_clears_disconnect_dedup() {
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (ev_tx, ev_rx) = mpsc::channel(8);
        let rt = Arc::new(AgentRuntime::new(AgentConfig::default(), out_tx, ev_tx.clone()));
        rt.alert_dedup
            .insert("switcher_disconnected".to_string(), Instant::now());

        Arc::clone(&rt).start(ev_rx);
        ev_tx
            .send(DeviceEvent::Connected { device: "switcher" })
            .await
            .unwrap();
        // Give the pump a beat to process.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!rt.alert_dedup.contains_key("switcher_disconnected"));
    }
}
