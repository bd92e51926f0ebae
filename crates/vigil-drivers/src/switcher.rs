//! Production switcher driver — TCP 9910, binary framed, stateful.
//!
//! The device streams its full state on connect and pushes a frame for every
//! change afterwards, so the driver keeps a local mirror and answers status
//! queries from memory. Frames are `[len u16][reserved u16][code 4×ASCII]`
//! followed by a code-specific payload, big-endian throughout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vigil_protocol::telemetry::SwitcherStatus;

use crate::backoff::Backoff;
use crate::error::{DriverError, Result};
use crate::event::DeviceEvent;
use crate::DeviceDriver;

const PORT: u16 = 9910;
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const HEADER_LEN: usize = 8;

/// Auto-transition duration bounds in milliseconds.
const AUTO_MIN_MS: f64 = 200.0;
const AUTO_MAX_MS: f64 = 3000.0;

#[derive(Debug, Default, Clone)]
struct SwitcherState {
    program_input: u16,
    preview_input: u16,
    recording: bool,
    faded_to_black: bool,
    in_transition: bool,
    /// Raw master-audio level as last reported by the device. Two encodings
    /// exist in the field: negative values are dBFS·1000, positive values
    /// ≤32768 are linear samples. Decoding is the silence detector's job.
    master_audio_level: Option<f64>,
}

struct Inner {
    addr: String,
    state: Mutex<SwitcherState>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    shutdown: AtomicBool,
    events: mpsc::Sender<DeviceEvent>,
}

/// Driver handle. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Switcher {
    inner: Arc<Inner>,
}

impl Switcher {
    pub fn new(ip: &str, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr: format!("{ip}:{PORT}"),
                state: Mutex::new(SwitcherState::default()),
                writer: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn status(&self) -> SwitcherStatus {
        let state = self.inner.state.lock().unwrap();
        SwitcherStatus {
            connected: self.inner.connected.load(Ordering::Relaxed),
            program_input: state.program_input,
            preview_input: state.preview_input,
            recording: state.recording,
            faded_to_black: state.faded_to_black,
            in_transition: state.in_transition,
        }
    }

    /// Raw master-audio level for the silence detector. `None` until the
    /// device has reported one.
    pub fn master_audio_level(&self) -> Option<f64> {
        self.inner.state.lock().unwrap().master_audio_level
    }

    pub async fn set_program(&self, me: u8, input: u16) -> Result<()> {
        self.send(b"CPgI", &me_input_payload(me, input)).await
    }

    pub async fn set_preview(&self, me: u8, input: u16) -> Result<()> {
        self.send(b"CPvI", &me_input_payload(me, input)).await
    }

    pub async fn cut(&self, me: u8) -> Result<()> {
        self.send(b"DCut", &[me, 0, 0, 0]).await
    }

    /// Timed auto-transition. `rate` is in frames; wall duration is
    /// `rate/30 · 1000 ms` clamped to 200–3000 ms.
    pub async fn auto(&self, me: u8, rate: u16) -> Result<()> {
        self.send(b"DAut", &[me, 0, 0, 0]).await?;

        let duration_ms = (f64::from(rate) / 30.0 * 1000.0).clamp(AUTO_MIN_MS, AUTO_MAX_MS);
        {
            let mut state = self.inner.state.lock().unwrap();
            state.in_transition = true;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(duration_ms as u64)).await;
            {
                let mut guard = inner.state.lock().unwrap();
                let state = &mut *guard;
                // The completed transition swaps program and preview.
                std::mem::swap(&mut state.program_input, &mut state.preview_input);
                state.in_transition = false;
            }
            let _ = inner.events.send(DeviceEvent::SwitcherState).await;
        });
        Ok(())
    }

    pub async fn fade_to_black(&self, me: u8) -> Result<()> {
        self.send(b"FtbA", &[me, 0, 0, 0]).await
    }

    pub async fn set_recording(&self, on: bool) -> Result<()> {
        self.send(b"RecA", &[u8::from(on), 0, 0, 0]).await
    }

    /// Rename an input. Names longer than 20 bytes are truncated by the
    /// device, so we truncate before sending.
    pub async fn relabel_input(&self, input: u16, name: &str) -> Result<()> {
        let mut payload = vec![0u8; 24];
        payload[0..2].copy_from_slice(&input.to_be_bytes());
        let bytes = name.as_bytes();
        let n = bytes.len().min(20);
        payload[4..4 + n].copy_from_slice(&bytes[..n]);
        self.send(b"CInL", &payload).await
    }

    pub async fn run_macro(&self, index: u16) -> Result<()> {
        let mut payload = [0u8; 4];
        payload[0..2].copy_from_slice(&index.to_be_bytes());
        self.send(b"MAct", &payload).await
    }

    pub async fn set_aux(&self, aux: u8, source: u16) -> Result<()> {
        let mut payload = [0u8; 4];
        payload[0] = aux;
        payload[2..4].copy_from_slice(&source.to_be_bytes());
        self.send(b"CAuS", &payload).await
    }

    /// Put an upstream or downstream keyer on or off air.
    pub async fn set_keyer_on_air(&self, me: u8, keyer: u8, upstream: bool, on: bool) -> Result<()> {
        self.send(b"KeOn", &[me, keyer, u8::from(upstream), u8::from(on)])
            .await
    }

    /// Position a SuperSource box. Position clamps to [−1, 1] on both axes,
    /// size to [0.05, 1].
    pub async fn set_supersource_box(
        &self,
        box_index: u8,
        x: f64,
        y: f64,
        size: f64,
        enabled: bool,
    ) -> Result<()> {
        let x = x.clamp(-1.0, 1.0);
        let y = y.clamp(-1.0, 1.0);
        let size = size.clamp(0.05, 1.0);

        let mut payload = [0u8; 10];
        payload[0] = box_index;
        payload[1] = u8::from(enabled);
        payload[2..4].copy_from_slice(&scaled_i16(x).to_be_bytes());
        payload[4..6].copy_from_slice(&scaled_i16(y).to_be_bytes());
        payload[6..8].copy_from_slice(&((size * 1000.0) as u16).to_be_bytes());
        self.send(b"CSBP", &payload).await
    }

    /// Set a color generator. Hue clamps to 0–359, saturation and luma to
    /// 0–1000 (device units).
    pub async fn set_color(&self, generator: u8, hue: u16, sat: u16, luma: u16) -> Result<()> {
        let hue = hue.min(359);
        let sat = sat.min(1000);
        let luma = luma.min(1000);

        let mut payload = [0u8; 8];
        payload[0] = generator;
        payload[2..4].copy_from_slice(&hue.to_be_bytes());
        payload[4..6].copy_from_slice(&sat.to_be_bytes());
        payload[6..8].copy_from_slice(&luma.to_be_bytes());
        self.send(b"CClV", &payload).await
    }

    /// Drive a PTZ camera head over the switcher's camera-control bus.
    /// All axes clamp to [−1, 1].
    pub async fn ptz(&self, camera: u8, pan: f64, tilt: f64, zoom: f64) -> Result<()> {
        let mut payload = [0u8; 8];
        payload[0] = camera;
        payload[2..4].copy_from_slice(&scaled_i16(pan.clamp(-1.0, 1.0)).to_be_bytes());
        payload[4..6].copy_from_slice(&scaled_i16(tilt.clamp(-1.0, 1.0)).to_be_bytes());
        payload[6..8].copy_from_slice(&scaled_i16(zoom.clamp(-1.0, 1.0)).to_be_bytes());
        self.send(b"CPtz", &payload).await
    }

    async fn send(&self, code: &[u8; 4], payload: &[u8]) -> Result<()> {
        if !self.inner.connected.load(Ordering::Relaxed) {
            return Err(DriverError::NotConnected);
        }
        let frame = encode_frame(code, payload);
        let mut writer = self.inner.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(DriverError::NotConnected);
        };
        if let Err(e) = w.write_all(&frame).await {
            drop(writer);
            self.inner.mark_disconnected().await;
            Inner::schedule_reconnect(Arc::clone(&self.inner));
            return Err(DriverError::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceDriver for Switcher {
    fn name(&self) -> &'static str {
        "switcher"
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
        *self.inner.writer.lock().await = None;
        self.inner.connected.store(false, Ordering::Relaxed);
    }

    async fn is_reachable(&self) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&self.inner.addr)).await,
            Ok(Ok(_))
        )
    }

    fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }
}

impl Inner {
    async fn open(inner: Arc<Inner>) -> Result<()> {
        let stream = tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&inner.addr))
            .await
            .map_err(|_| DriverError::Timeout { ms: 3000 })?
            .map_err(|e| DriverError::Unreachable(e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        *inner.writer.lock().await = Some(write_half);
        inner.connected.store(true, Ordering::Relaxed);
        let _ = inner.events.send(DeviceEvent::Connected { device: "switcher" }).await;

        tokio::spawn(Self::read_loop(Arc::clone(&inner), read_half));
        Ok(())
    }

    async fn read_loop(inner: Arc<Inner>, mut read_half: OwnedReadHalf) {
        let mut header = [0u8; HEADER_LEN];
        loop {
            if read_half.read_exact(&mut header).await.is_err() {
                break;
            }
            let total = u16::from_be_bytes([header[0], header[1]]) as usize;
            if total < HEADER_LEN || total > 4096 {
                debug!(total, "switcher: implausible frame length, resyncing via reconnect");
                break;
            }
            let mut payload = vec![0u8; total - HEADER_LEN];
            if read_half.read_exact(&mut payload).await.is_err() {
                break;
            }
            let code = [header[4], header[5], header[6], header[7]];
            inner.apply_frame(&code, &payload).await;
        }

        inner.mark_disconnected().await;
        if !inner.shutdown.load(Ordering::Relaxed) {
            Self::schedule_reconnect(inner);
        }
    }

    async fn apply_frame(&self, code: &[u8; 4], payload: &[u8]) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            match code {
                b"PrgI" if payload.len() >= 4 => {
                    state.program_input = u16::from_be_bytes([payload[2], payload[3]]);
                    true
                }
                b"PrvI" if payload.len() >= 4 => {
                    state.preview_input = u16::from_be_bytes([payload[2], payload[3]]);
                    true
                }
                b"RecS" if !payload.is_empty() => {
                    state.recording = payload[0] != 0;
                    true
                }
                b"FtbS" if payload.len() >= 2 => {
                    state.faded_to_black = payload[1] != 0;
                    true
                }
                b"TrPs" if payload.len() >= 2 => {
                    state.in_transition = payload[1] != 0;
                    true
                }
                b"AMLv" if payload.len() >= 4 => {
                    let raw = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    state.master_audio_level = Some(f64::from(raw));
                    // Level frames arrive continuously; not a state change.
                    false
                }
                _ => {
                    // Unknown codes are fine — the device speaks a superset.
                    false
                }
            }
        };
        if changed {
            let _ = self.events.send(DeviceEvent::SwitcherState).await;
        }
    }

    async fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            *self.writer.lock().await = None;
            let _ = self
                .events
                .send(DeviceEvent::Disconnected { device: "switcher" })
                .await;
        }
    }

    /// Exponential reconnect loop. The `reconnecting` flag guarantees a
    /// single in-flight loop per device regardless of how many callers
    /// observe the failure.
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
                debug!(delay_secs = delay.as_secs(), "switcher: reconnecting");
                tokio::time::sleep(delay).await;
                if inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match Self::open(Arc::clone(&inner)).await {
                    Ok(()) => break,
                    Err(e) => warn!(error = %e, "switcher: reconnect failed"),
                }
            }
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

fn encode_frame(code: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let total = (HEADER_LEN + payload.len()) as u16;
    let mut frame = Vec::with_capacity(total as usize);
    frame.extend_from_slice(&total.to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(code);
    frame.extend_from_slice(payload);
    frame
}

fn me_input_payload(me: u8, input: u16) -> [u8; 4] {
    let input_bytes = input.to_be_bytes();
    [me, 0, input_bytes[0], input_bytes[1]]
}

fn scaled_i16(v: f64) -> i16 {
    (v * 1000.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let frame = encode_frame(b"CPgI", &[0, 0, 0, 5]);
        assert_eq!(frame.len(), 12);
        assert_eq!(u16::from_be_bytes([frame[0], frame[1]]), 12);
        assert_eq!(&frame[4..8], b"CPgI");
        assert_eq!(frame[11], 5);
    }

    #[test]
    fn auto_duration_clamps() {
        // rate 3 frames → 100 ms raw, clamps to the 200 ms floor
        let low = (3.0_f64 / 30.0 * 1000.0).clamp(AUTO_MIN_MS, AUTO_MAX_MS);
        assert_eq!(low, 200.0);
        // rate 300 frames → 10 s raw, clamps to the 3 s ceiling
        let high = (300.0_f64 / 30.0 * 1000.0).clamp(AUTO_MIN_MS, AUTO_MAX_MS);
        assert_eq!(high, 3000.0);
        // rate 30 frames → exactly 1 s, untouched
        let mid = (30.0_f64 / 30.0 * 1000.0).clamp(AUTO_MIN_MS, AUTO_MAX_MS);
        assert_eq!(mid, 1000.0);
    }

    #[test]
    fn supersource_clamps() {
        assert_eq!(scaled_i16((-1.8_f64).clamp(-1.0, 1.0)), -1000);
        assert_eq!(scaled_i16(0.5_f64.clamp(-1.0, 1.0)), 500);
        assert_eq!((0.01_f64.clamp(0.05, 1.0) * 1000.0) as u16, 50);
    }

    #[tokio::test]
    async fn program_frame_updates_state() {
        let (tx, mut rx) = mpsc::channel(8);
        let sw = Switcher::new("127.0.0.1", tx);
        sw.inner
            .apply_frame(b"PrgI", &[0, 0, 0, 7])
            .await;
        assert_eq!(sw.status().program_input, 7);
        assert_eq!(rx.recv().await, Some(DeviceEvent::SwitcherState));
    }

    #[tokio::test]
    async fn audio_level_frame_is_not_a_state_change() {
        let (tx, mut rx) = mpsc::channel(8);
        let sw = Switcher::new("127.0.0.1", tx);
        let raw = (-45_000_i32).to_be_bytes();
        sw.inner.apply_frame(b"AMLv", &raw).await;
        assert_eq!(sw.master_audio_level(), Some(-45_000.0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_connection_fails_typed() {
        let (tx, _rx) = mpsc::channel(8);
        let sw = Switcher::new("127.0.0.1", tx);
        let err = sw.cut(0).await.unwrap_err();
        assert!(matches!(err, DriverError::NotConnected));
    }
}
