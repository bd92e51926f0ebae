//! Streaming encoder driver — WebSocket JSON-RPC.
//!
//! Call-and-reply correlated by a request id, plus unsolicited push events
//! for stream/record state and periodic stats. Auth is a salted-hash
//! challenge: the hello frame carries a challenge string, the client answers
//! with `sha256(password + challenge)` hex.
//!
//! Wire shapes:
//! ```text
//! → { "op": "request", "id": "…", "type": "StartStream", "data": {…} }
//! ← { "op": "response", "id": "…", "status": "ok", "data": {…} }
//! ← { "op": "event", "type": "StreamStateChanged", "data": { "streaming": true } }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use vigil_protocol::telemetry::StreamerStatus;

use crate::backoff::Backoff;
use crate::error::{DriverError, Result};
use crate::event::DeviceEvent;
use crate::DeviceDriver;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Default, Clone)]
struct StreamerState {
    streaming: bool,
    recording: bool,
    fps: f64,
    bitrate: f64,
    cpu_usage: f64,
}

struct Inner {
    url: String,
    password: Option<String>,
    state: Mutex<StreamerState>,
    pending: DashMap<String, oneshot::Sender<Value>>,
    outbound: tokio::sync::Mutex<Option<mpsc::Sender<Message>>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    shutdown: AtomicBool,
    events: mpsc::Sender<DeviceEvent>,
}

#[derive(Clone)]
pub struct Streamer {
    inner: Arc<Inner>,
}

impl Streamer {
    pub fn new(url: &str, password: Option<String>, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                password,
                state: Mutex::new(StreamerState::default()),
                pending: DashMap::new(),
                outbound: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn status(&self) -> StreamerStatus {
        let state = self.inner.state.lock().unwrap();
        StreamerStatus {
            connected: self.inner.connected.load(Ordering::Relaxed),
            streaming: state.streaming,
            recording: state.recording,
            fps: state.fps,
            bitrate: state.bitrate,
            cpu_usage: state.cpu_usage,
        }
    }

    /// Current outbound bitrate in kbps, from the latest stats push.
    pub fn current_bitrate(&self) -> f64 {
        self.inner.state.lock().unwrap().bitrate
    }

    /// Issue a correlated request and wait for its reply payload.
    pub async fn call(&self, method: &str, data: Value) -> Result<Value> {
        if !self.inner.connected.load(Ordering::Relaxed) {
            return Err(DriverError::NotConnected);
        }
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), tx);

        let frame = json!({ "op": "request", "id": id, "type": method, "data": data });
        let sent = {
            let outbound = self.inner.outbound.lock().await;
            match outbound.as_ref() {
                Some(tx) => tx.send(Message::Text(frame.to_string().into())).await.is_ok(),
                None => false,
            }
        };
        if !sent {
            self.inner.pending.remove(&id);
            return Err(DriverError::NotConnected);
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(reply)) => {
                if reply["status"] == "error" {
                    let msg = reply["error"].as_str().unwrap_or("request failed");
                    Err(DriverError::Nak(msg.to_string()))
                } else {
                    Ok(reply["data"].clone())
                }
            }
            Ok(Err(_)) => Err(DriverError::NotConnected),
            Err(_) => {
                self.inner.pending.remove(&id);
                Err(DriverError::Timeout {
                    ms: CALL_TIMEOUT.as_millis() as u64,
                })
            }
        }
    }

    pub async fn start_stream(&self) -> Result<()> {
        self.call("StartStream", Value::Null).await.map(|_| ())
    }

    pub async fn stop_stream(&self) -> Result<()> {
        self.call("StopStream", Value::Null).await.map(|_| ())
    }

    pub async fn start_record(&self) -> Result<()> {
        self.call("StartRecord", Value::Null).await.map(|_| ())
    }

    pub async fn stop_record(&self) -> Result<()> {
        self.call("StopRecord", Value::Null).await.map(|_| ())
    }

    pub async fn set_scene(&self, name: &str) -> Result<()> {
        self.call("SetCurrentScene", json!({ "scene": name }))
            .await
            .map(|_| ())
    }

    pub async fn set_bitrate(&self, kbps: u32) -> Result<()> {
        self.call("SetBitrate", json!({ "bitrate": kbps }))
            .await
            .map(|_| ())
    }

    /// Capture a screenshot of `source` as base64 JPEG data.
    pub async fn screenshot(&self, source: &str, width: u32, height: u32) -> Result<String> {
        let data = self
            .call(
                "GetSourceScreenshot",
                json!({ "source": source, "format": "jpeg", "width": width, "height": height }),
            )
            .await?;
        data["img"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| DriverError::Protocol("screenshot reply missing img".into()))
    }
}

#[async_trait]
impl DeviceDriver for Streamer {
    fn name(&self) -> &'static str {
        "streamer"
    }

    async fn connect(&self) -> Result<()> {
        if self.inner.connected.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.inner.shutdown.store(false, Ordering::Relaxed);
        Inner::open(Arc::clone(&self.inner)).await
    }

    async fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::Relaxed);
        *self.inner.outbound.lock().await = None;
        self.inner.connected.store(false, Ordering::Relaxed);
    }

    async fn is_reachable(&self) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, tokio_tungstenite::connect_async(&self.inner.url))
                .await,
            Ok(Ok(_))
        )
    }

    fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }
}

impl Inner {
    async fn open(inner: Arc<Inner>) -> Result<()> {
        let (ws, _) = tokio::time::timeout(PROBE_TIMEOUT, tokio_tungstenite::connect_async(&inner.url))
            .await
            .map_err(|_| DriverError::Timeout { ms: 3000 })?
            .map_err(|e| DriverError::Unreachable(e.to_string()))?;

        let (mut sink, mut stream) = ws.split();

        // Hello/auth handshake before entering the pump loops.
        let hello = tokio::time::timeout(PROBE_TIMEOUT, stream.next())
            .await
            .map_err(|_| DriverError::Timeout { ms: 3000 })?
            .ok_or_else(|| DriverError::Unreachable("closed during handshake".into()))?
            .map_err(|e| DriverError::Unreachable(e.to_string()))?;

        if let Message::Text(text) = hello {
            let value: Value = serde_json::from_str(&text)?;
            if let Some(challenge) = value["challenge"].as_str() {
                let password = inner
                    .password
                    .as_deref()
                    .ok_or_else(|| DriverError::Protocol("streamer requires a password".into()))?;
                let answer = hex::encode(Sha256::digest(format!("{password}{challenge}")));
                let auth = json!({ "op": "auth", "token": answer });
                sink.send(Message::Text(auth.to_string().into()))
                    .await
                    .map_err(|e| DriverError::Unreachable(e.to_string()))?;

                let verdict = tokio::time::timeout(PROBE_TIMEOUT, stream.next())
                    .await
                    .map_err(|_| DriverError::Timeout { ms: 3000 })?
                    .ok_or_else(|| DriverError::Unreachable("closed during auth".into()))?
                    .map_err(|e| DriverError::Unreachable(e.to_string()))?;
                let ok = matches!(&verdict, Message::Text(t)
                    if serde_json::from_str::<Value>(t).map(|v| v["op"] == "authed").unwrap_or(false));
                if !ok {
                    return Err(DriverError::Protocol("streamer auth rejected".into()));
                }
            }
        }

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);
        *inner.outbound.lock().await = Some(out_tx);
        inner.connected.store(true, Ordering::Relaxed);
        let _ = inner
            .events
            .send(DeviceEvent::Connected { device: "streamer" })
            .await;

        // Writer pump.
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // Reader pump.
        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => reader_inner.handle_frame(&text).await,
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            reader_inner.mark_disconnected().await;
            if !reader_inner.shutdown.load(Ordering::Relaxed) {
                Self::schedule_reconnect(reader_inner);
            }
        });

        Ok(())
    }

    async fn handle_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "streamer: malformed frame");
                return;
            }
        };

        match value["op"].as_str() {
            Some("response") => {
                if let Some(id) = value["id"].as_str() {
                    if let Some((_, tx)) = self.pending.remove(id) {
                        let _ = tx.send(value);
                    }
                }
            }
            Some("event") => self.apply_event(&value).await,
            _ => {}
        }
    }

    async fn apply_event(&self, value: &Value) {
        let data = &value["data"];
        match value["type"].as_str() {
            Some("StreamStateChanged") => {
                let streaming = data["streaming"].as_bool().unwrap_or(false);
                self.state.lock().unwrap().streaming = streaming;
                let _ = self
                    .events
                    .send(DeviceEvent::StreamStateChanged { streaming })
                    .await;
            }
            Some("RecordStateChanged") => {
                let recording = data["recording"].as_bool().unwrap_or(false);
                self.state.lock().unwrap().recording = recording;
                let _ = self
                    .events
                    .send(DeviceEvent::RecordStateChanged { recording })
                    .await;
            }
            Some("Stats") => {
                let mut state = self.state.lock().unwrap();
                if let Some(fps) = data["fps"].as_f64() {
                    state.fps = fps;
                }
                if let Some(bitrate) = data["bitrate"].as_f64() {
                    state.bitrate = bitrate;
                }
                if let Some(cpu) = data["cpuUsage"].as_f64() {
                    state.cpu_usage = cpu;
                }
            }
            other => debug!(event = ?other, "streamer: unhandled event"),
        }
    }

    async fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            *self.outbound.lock().await = None;
            self.pending.clear();
            let _ = self
                .events
                .send(DeviceEvent::Disconnected { device: "streamer" })
                .await;
        }
    }

    fn schedule_reconnect(inner: Arc<Inner>) {
        if inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            let mut backoff = Backoff::device();
            loop {
                if inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let delay = backoff.next_delay();
                debug!(delay_secs = delay.as_secs(), "streamer: reconnecting");
                tokio::time::sleep(delay).await;
                if inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match Self::open(Arc::clone(&inner)).await {
                    Ok(()) => break,
                    Err(e) => warn!(error = %e, "streamer: reconnect failed"),
                }
            }
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_streamer() -> (Streamer, mpsc::Receiver<DeviceEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (Streamer::new("ws://127.0.0.1:4455", None, tx), rx)
    }

    #[tokio::test]
    async fn stream_state_event_updates_status_and_forwards() {
        let (streamer, mut rx) = test_streamer();
        streamer
            .inner
            .apply_event(&json!({
                "op": "event", "type": "StreamStateChanged",
                "data": { "streaming": true }
            }))
            .await;
        assert!(streamer.status().streaming);
        assert_eq!(
            rx.recv().await,
            Some(DeviceEvent::StreamStateChanged { streaming: true })
        );
    }

    #[tokio::test]
    async fn stats_event_updates_counters_quietly() {
        let (streamer, mut rx) = test_streamer();
        streamer
            .inner
            .apply_event(&json!({
                "op": "event", "type": "Stats",
                "data": { "fps": 29.97, "bitrate": 4500.0, "cpuUsage": 21.5 }
            }))
            .await;
        let status = streamer.status();
        assert_eq!(status.fps, 29.97);
        assert_eq!(streamer.current_bitrate(), 4500.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn response_resolves_pending_waiter() {
        let (streamer, _rx) = test_streamer();
        let (tx, rx) = oneshot::channel();
        streamer.inner.pending.insert("r-1".into(), tx);
        streamer
            .inner
            .handle_frame(r#"{"op":"response","id":"r-1","status":"ok","data":{"x":1}}"#)
            .await;
        let reply = rx.await.unwrap();
        assert_eq!(reply["data"]["x"], 1);
        assert!(streamer.inner.pending.is_empty());
    }

    #[tokio::test]
    async fn call_without_connection_is_typed_error() {
        let (streamer, _rx) = test_streamer();
        assert!(matches!(
            streamer.start_stream().await,
            Err(DriverError::NotConnected)
        ));
    }
}
