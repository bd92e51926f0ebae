//! Slide software driver — HTTP REST for control, a secondary WebSocket
//! (`/stagedisplay`) for slide-change push.
//!
//! Reachability is a HEAD to `/v1/version` bounded at 3 s. Presentation
//! state is refreshed by a quiet poll loop and corrected immediately by the
//! push feed, so the telemetry snapshot is never more than a slide behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use vigil_protocol::telemetry::SlidesStatus;

use crate::backoff::Backoff;
use crate::error::{DriverError, Result};
use crate::event::DeviceEvent;
use crate::DeviceDriver;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct State {
    running: bool,
    current_presentation: Option<String>,
    slide_index: u32,
    slide_total: u32,
}

struct Inner {
    base: String,
    ws_url: String,
    http: reqwest::Client,
    state: Mutex<State>,
    connected: AtomicBool,
    shutdown: AtomicBool,
    events: mpsc::Sender<DeviceEvent>,
}

#[derive(Clone)]
pub struct Slides {
    inner: Arc<Inner>,
}

impl Slides {
    pub fn new(host: &str, port: u16, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                base: format!("http://{host}:{port}"),
                ws_url: format!("ws://{host}:{port}/stagedisplay"),
                http: reqwest::Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                    .unwrap_or_default(),
                state: Mutex::new(State::default()),
                connected: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn status(&self) -> SlidesStatus {
        let state = self.inner.state.lock().unwrap();
        SlidesStatus {
            connected: self.inner.connected.load(Ordering::Relaxed),
            running: state.running,
            current_presentation: state.current_presentation.clone(),
            slide_index: state.slide_index,
            slide_total: state.slide_total,
        }
    }

    pub async fn next_slide(&self) -> Result<()> {
        self.trigger("next").await
    }

    pub async fn previous_slide(&self) -> Result<()> {
        self.trigger("previous").await
    }

    /// Jump straight to a slide index in the active presentation.
    pub async fn trigger_index(&self, index: u32) -> Result<()> {
        let url = format!("{}/v1/presentation/active/{index}/trigger", self.inner.base);
        self.inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DriverError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| DriverError::Nak(e.to_string()))?;
        Ok(())
    }

    async fn trigger(&self, which: &str) -> Result<()> {
        let url = format!("{}/v1/trigger/{which}", self.inner.base);
        self.inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DriverError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| DriverError::Nak(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DeviceDriver for Slides {
    fn name(&self) -> &'static str {
        "slides"
    }

    async fn connect(&self) -> Result<()> {
        if self.inner.connected.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.inner.shutdown.store(false, Ordering::Relaxed);
        if !self.is_reachable().await {
            return Err(DriverError::Unreachable(self.inner.base.clone()));
        }
        self.inner.connected.store(true, Ordering::Relaxed);
        let _ = self.inner.events.send(DeviceEvent::Connected { device: "slides" }).await;

        tokio::spawn(Inner::poll_loop(Arc::clone(&self.inner)));
        tokio::spawn(Inner::stagedisplay_loop(Arc::clone(&self.inner)));
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::Relaxed);
        self.inner.connected.store(false, Ordering::Relaxed);
    }

    async fn is_reachable(&self) -> bool {
        let url = format!("{}/v1/version", self.inner.base);
        let probe = self.inner.http.head(url).timeout(PROBE_TIMEOUT).send();
        matches!(probe.await, Ok(r) if r.status().is_success())
    }

    fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }
}

impl Inner {
    /// Quiet refresh of presentation state. Errors mark the device
    /// disconnected and are otherwise swallowed.
    async fn poll_loop(inner: Arc<Inner>) {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        loop {
            tick.tick().await;
            if inner.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let url = format!("{}/v1/presentation/active", inner.base);
            match inner.http.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    if let Ok(body) = resp.json::<Value>().await {
                        inner.apply_presentation(&body);
                    }
                    inner.connected.store(true, Ordering::Relaxed);
                }
                _ => {
                    if inner.connected.swap(false, Ordering::Relaxed) {
                        let _ = inner
                            .events
                            .send(DeviceEvent::Disconnected { device: "slides" })
                            .await;
                    }
                }
            }
        }
    }

    fn apply_presentation(&self, body: &Value) {
        let mut state = self.state.lock().unwrap();
        state.running = !body.is_null();
        state.current_presentation = body["presentation"]["name"]
            .as_str()
            .map(String::from);
        if let Some(index) = body["slideIndex"].as_u64() {
            state.slide_index = index as u32;
        }
        if let Some(total) = body["slideTotal"].as_u64() {
            state.slide_total = total as u32;
        }
    }

    /// Push feed. Reconnects on its own backoff; the REST side stays usable
    /// while the feed is down.
    async fn stagedisplay_loop(inner: Arc<Inner>) {
        let mut backoff = Backoff::device();
        loop {
            if inner.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match tokio_tungstenite::connect_async(&inner.ws_url).await {
                Ok((ws, _)) => {
                    backoff.reset();
                    let (_, mut stream) = ws.split();
                    while let Some(msg) = stream.next().await {
                        if inner.shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        match msg {
                            Ok(Message::Text(text)) => {
                                if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                    inner.apply_push(&value).await;
                                }
                            }
                            Ok(Message::Close(_)) | Err(_) => break,
                            _ => {}
                        }
                    }
                    debug!("slides: stagedisplay feed closed");
                }
                Err(e) => warn!(error = %e, "slides: stagedisplay connect failed"),
            }
            let delay = backoff.next_delay();
            tokio::time::sleep(delay).await;
        }
    }

    async fn apply_push(&self, value: &Value) {
        if value["action"] != "slideChanged" {
            return;
        }
        let index = value["slideIndex"].as_u64().unwrap_or(0) as u32;
        let total = value["slideTotal"].as_u64().unwrap_or(0) as u32;
        {
            let mut state = self.state.lock().unwrap();
            state.slide_index = index;
            state.slide_total = total;
        }
        let _ = self
            .events
            .send(DeviceEvent::SlideChanged { index, total })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_slides() -> (Slides, mpsc::Receiver<DeviceEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (Slides::new("127.0.0.1", 1025, tx), rx)
    }

    #[tokio::test]
    async fn slide_change_push_updates_state_and_emits() {
        let (slides, mut rx) = test_slides();
        slides
            .inner
            .apply_push(&json!({ "action": "slideChanged", "slideIndex": 4, "slideTotal": 12 }))
            .await;
        let status = slides.status();
        assert_eq!(status.slide_index, 4);
        assert_eq!(status.slide_total, 12);
        assert_eq!(
            rx.recv().await,
            Some(DeviceEvent::SlideChanged { index: 4, total: 12 })
        );
    }

    #[tokio::test]
    async fn non_slide_actions_are_ignored() {
        let (slides, mut rx) = test_slides();
        slides.inner.apply_push(&json!({ "action": "clockUpdate" })).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn presentation_body_fills_status() {
        let (slides, _rx) = test_slides();
        slides.inner.apply_presentation(&json!({
            "presentation": { "name": "Sunday AM" },
            "slideIndex": 2,
            "slideTotal": 30
        }));
        let status = slides.status();
        assert!(status.running);
        assert_eq!(status.current_presentation.as_deref(), Some("Sunday AM"));
        assert_eq!(status.slide_total, 30);
    }
}
