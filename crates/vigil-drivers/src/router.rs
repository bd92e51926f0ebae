//! Video router driver — TCP 9990, text framed.
//!
//! The wire is line-oriented: blocks separated by a blank line, first line a
//! `HEADER:` label, following lines `index payload`. Queries are a bare
//! header + blank line; the device answers with the same header and a body.
//! Mutations are a header + body; the device answers `ACK` or `NAK` in issue
//! order. Routing changes are also pushed unsolicited, so state updates are
//! applied to every routing block whether or not a query is pending.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use vigil_protocol::telemetry::RouterStatus;

use crate::backoff::Backoff;
use crate::error::{DriverError, Result};
use crate::event::DeviceEvent;
use crate::DeviceDriver;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

const INPUT_LABELS: &str = "INPUT LABELS:";
const OUTPUT_LABELS: &str = "OUTPUT LABELS:";
const OUTPUT_ROUTING: &str = "VIDEO OUTPUT ROUTING:";

#[derive(Debug, Default)]
struct RouterState {
    input_labels: HashMap<u32, String>,
    output_labels: HashMap<u32, String>,
    /// output → input
    routing: HashMap<u32, u32>,
}

struct PendingQuery {
    expected: String,
    tx: oneshot::Sender<Vec<String>>,
}

struct Inner {
    addr: String,
    state: Mutex<RouterState>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    /// Outstanding queries, oldest first. An incoming block resolves the
    /// oldest entry whose expected header matches.
    pending: Mutex<Vec<PendingQuery>>,
    /// ACK/NAK waiters for mutating writes, strictly in issue order.
    acks: Mutex<VecDeque<oneshot::Sender<bool>>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    shutdown: AtomicBool,
    events: mpsc::Sender<DeviceEvent>,
}

#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
    pub label: Option<String>,
}

impl Router {
    pub fn new(host: &str, port: u16, label: Option<String>, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr: format!("{host}:{port}"),
                state: Mutex::new(RouterState::default()),
                writer: tokio::sync::Mutex::new(None),
                pending: Mutex::new(Vec::new()),
                acks: Mutex::new(VecDeque::new()),
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                events,
            }),
            label,
        }
    }

    pub fn status(&self) -> RouterStatus {
        let state = self.inner.state.lock().unwrap();
        RouterStatus {
            connected: self.inner.connected.load(Ordering::Relaxed),
            route_count: state.routing.len() as u32,
            inputs: state.input_labels.len() as u32,
            outputs: state.output_labels.len() as u32,
        }
    }

    pub fn input_labels(&self) -> HashMap<u32, String> {
        self.inner.state.lock().unwrap().input_labels.clone()
    }

    pub fn output_labels(&self) -> HashMap<u32, String> {
        self.inner.state.lock().unwrap().output_labels.clone()
    }

    pub fn routing(&self) -> HashMap<u32, u32> {
        self.inner.state.lock().unwrap().routing.clone()
    }

    /// Route `input` to `output`. Resolves on the device's ACK/NAK.
    pub async fn route(&self, output: u32, input: u32) -> Result<()> {
        self.mutate(&format!("{OUTPUT_ROUTING}\n{output} {input}\n\n"))
            .await
    }

    pub async fn set_output_label(&self, output: u32, label: &str) -> Result<()> {
        self.mutate(&format!("{OUTPUT_LABELS}\n{output} {label}\n\n"))
            .await
    }

    pub async fn set_input_label(&self, input: u32, label: &str) -> Result<()> {
        self.mutate(&format!("{INPUT_LABELS}\n{input} {label}\n\n"))
            .await
    }

    /// Issue a query and wait for the matching reply block's body lines.
    pub async fn query(&self, header: &str) -> Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().push(PendingQuery {
            expected: header.to_string(),
            tx,
        });
        self.write_raw(&format!("{header}\n\n")).await?;
        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(lines)) => Ok(lines),
            Ok(Err(_)) => Err(DriverError::NotConnected),
            Err(_) => {
                // Drop the stale entry so a late reply can't hit a dead waiter.
                self.inner
                    .pending
                    .lock()
                    .unwrap()
                    .retain(|p| p.expected != header || !p.tx.is_closed());
                Err(DriverError::Timeout {
                    ms: REPLY_TIMEOUT.as_millis() as u64,
                })
            }
        }
    }

    async fn mutate(&self, block: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.acks.lock().unwrap().push_back(tx);
        self.write_raw(block).await?;
        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(DriverError::Nak("router rejected change".into())),
            Ok(Err(_)) => Err(DriverError::NotConnected),
            Err(_) => Err(DriverError::Timeout {
                ms: REPLY_TIMEOUT.as_millis() as u64,
            }),
        }
    }

    async fn write_raw(&self, text: &str) -> Result<()> {
        if !self.inner.connected.load(Ordering::Relaxed) {
            return Err(DriverError::NotConnected);
        }
        let mut writer = self.inner.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(DriverError::NotConnected);
        };
        if let Err(e) = w.write_all(text.as_bytes()).await {
            drop(writer);
            self.inner.mark_disconnected().await;
            Inner::schedule_reconnect(Arc::clone(&self.inner));
            return Err(DriverError::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceDriver for Router {
    fn name(&self) -> &'static str {
        "router"
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
        let _ = inner.events.send(DeviceEvent::Connected { device: "router" }).await;

        tokio::spawn(Self::read_loop(Arc::clone(&inner), read_half));

        // Rehydrate labels and the routing table. The read loop applies the
        // reply blocks to state, so fire-and-forget is enough here.
        let rehydrate = Arc::clone(&inner);
        tokio::spawn(async move {
            for header in [INPUT_LABELS, OUTPUT_LABELS, OUTPUT_ROUTING] {
                let mut writer = rehydrate.writer.lock().await;
                if let Some(w) = writer.as_mut() {
                    let _ = w.write_all(format!("{header}\n\n").as_bytes()).await;
                }
            }
        });
        Ok(())
    }

    async fn read_loop(inner: Arc<Inner>, read_half: OwnedReadHalf) {
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let mut block: Vec<String> = Vec::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                if !block.is_empty() {
                    inner.handle_block(std::mem::take(&mut block)).await;
                }
            } else {
                block.push(trimmed.to_string());
            }
        }

        inner.mark_disconnected().await;
        if !inner.shutdown.load(Ordering::Relaxed) {
            Self::schedule_reconnect(inner);
        }
    }

    async fn handle_block(&self, block: Vec<String>) {
        let header = block[0].as_str();

        // ACK/NAK resolve the oldest outstanding mutation.
        if header == "ACK" || header == "NAK" {
            if let Some(tx) = self.acks.lock().unwrap().pop_front() {
                let _ = tx.send(header == "ACK");
            }
            return;
        }

        let body: Vec<String> = block[1..].to_vec();
        let mut changed_routes: Vec<(u32, u32)> = Vec::new();

        {
            let mut state = self.state.lock().unwrap();
            match header {
                INPUT_LABELS => {
                    for (idx, rest) in parse_indexed(&body) {
                        state.input_labels.insert(idx, rest);
                    }
                }
                OUTPUT_LABELS => {
                    for (idx, rest) in parse_indexed(&body) {
                        state.output_labels.insert(idx, rest);
                    }
                }
                OUTPUT_ROUTING => {
                    for (output, rest) in parse_indexed(&body) {
                        if let Ok(input) = rest.parse::<u32>() {
                            let prior = state.routing.insert(output, input);
                            if prior != Some(input) {
                                changed_routes.push((output, input));
                            }
                        }
                    }
                }
                _ => {
                    debug!(header, "router: ignoring block");
                }
            }
        }

        for (output, input) in changed_routes {
            let _ = self
                .events
                .send(DeviceEvent::RouteChanged { output, input })
                .await;
        }

        // Oldest pending query with a matching header wins the body.
        let waiter = {
            let mut pending = self.pending.lock().unwrap();
            pending
                .iter()
                .position(|p| p.expected == header)
                .map(|i| pending.remove(i))
        };
        if let Some(p) = waiter {
            let _ = p.tx.send(body);
        }
    }

    async fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            *self.writer.lock().await = None;
            self.pending.lock().unwrap().clear();
            self.acks.lock().unwrap().clear();
            let _ = self
                .events
                .send(DeviceEvent::Disconnected { device: "router" })
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
                debug!(delay_secs = delay.as_secs(), "router: reconnecting");
                tokio::time::sleep(delay).await;
                if inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match Self::open(Arc::clone(&inner)).await {
                    Ok(()) => break,
                    Err(e) => warn!(error = %e, "router: reconnect failed"),
                }
            }
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

/// Parse `index payload` body lines, skipping malformed ones.
fn parse_indexed(body: &[String]) -> Vec<(u32, String)> {
    body.iter()
        .filter_map(|line| {
            let (idx, rest) = line.split_once(' ')?;
            Some((idx.parse().ok()?, rest.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_router() -> (Router, mpsc::Receiver<DeviceEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (Router::new("127.0.0.1", 9990, None, tx), rx)
    }

    #[test]
    fn parse_indexed_skips_garbage() {
        let body = vec![
            "0 Camera 1".to_string(),
            "not-a-line".to_string(),
            "2 Slides".to_string(),
        ];
        let parsed = parse_indexed(&body);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], (0, "Camera 1".to_string()));
        assert_eq!(parsed[1], (2, "Slides".to_string()));
    }

    #[tokio::test]
    async fn routing_block_updates_state_and_emits_changes() {
        let (router, mut rx) = test_router();
        router
            .inner
            .handle_block(vec![
                OUTPUT_ROUTING.to_string(),
                "0 3".to_string(),
                "1 5".to_string(),
            ])
            .await;

        assert_eq!(router.routing().get(&0), Some(&3));
        assert_eq!(rx.recv().await, Some(DeviceEvent::RouteChanged { output: 0, input: 3 }));
        assert_eq!(rx.recv().await, Some(DeviceEvent::RouteChanged { output: 1, input: 5 }));

        // Re-applying the same routing is not a change.
        router
            .inner
            .handle_block(vec![OUTPUT_ROUTING.to_string(), "0 3".to_string()])
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn label_blocks_resolve_oldest_matching_pending() {
        let (router, _rx) = test_router();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        router.inner.pending.lock().unwrap().push(PendingQuery {
            expected: INPUT_LABELS.to_string(),
            tx: tx1,
        });
        router.inner.pending.lock().unwrap().push(PendingQuery {
            expected: INPUT_LABELS.to_string(),
            tx: tx2,
        });

        router
            .inner
            .handle_block(vec![INPUT_LABELS.to_string(), "0 Cam".to_string()])
            .await;

        // Oldest resolved, newer still waiting.
        assert_eq!(rx1.await.unwrap(), vec!["0 Cam".to_string()]);
        assert!(router.inner.pending.lock().unwrap().len() == 1);
        drop(rx2);
    }

    #[tokio::test]
    async fn ack_resolves_in_issue_order() {
        let (router, _rx) = test_router();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        router.inner.acks.lock().unwrap().push_back(tx1);
        router.inner.acks.lock().unwrap().push_back(tx2);

        router.inner.handle_block(vec!["ACK".to_string()]).await;
        router.inner.handle_block(vec!["NAK".to_string()]).await;

        assert!(rx1.await.unwrap());
        assert!(!rx2.await.unwrap());
    }

    #[tokio::test]
    async fn status_counts_follow_state() {
        let (router, _rx) = test_router();
        router
            .inner
            .handle_block(vec![
                INPUT_LABELS.to_string(),
                "0 Cam 1".to_string(),
                "1 Cam 2".to_string(),
            ])
            .await;
        router
            .inner
            .handle_block(vec![OUTPUT_LABELS.to_string(), "0 Projector".to_string()])
            .await;
        let status = router.status();
        assert_eq!(status.inputs, 2);
        assert_eq!(status.outputs, 1);
        assert!(!status.connected);
    }
}
