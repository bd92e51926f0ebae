//! Shared UDP/OSC plumbing for the console families.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{DriverError, Result};

use super::osc::OscMessage;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const PROBE_POLL: Duration = Duration::from_millis(200);

/// One connected UDP socket plus liveness bookkeeping. The receive loop is
/// spawned by the owning driver so each family can parse replies its own way.
pub(crate) struct OscEndpoint {
    addr: String,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    connected: AtomicBool,
    last_rx: Mutex<Option<Instant>>,
}

impl OscEndpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            socket: Mutex::new(None),
            connected: AtomicBool::new(false),
            last_rx: Mutex::new(None),
        }
    }

    /// Bind an ephemeral local port and connect it to the console. Returns
    /// the socket for the caller to spawn its receive loop on.
    pub async fn connect(&self) -> Result<Arc<UdpSocket>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(DriverError::Io)?;
        socket
            .connect(&self.addr)
            .await
            .map_err(|e| DriverError::Unreachable(e.to_string()))?;
        let socket = Arc::new(socket);
        *self.socket.lock().unwrap() = Some(Arc::clone(&socket));
        self.connected.store(true, Ordering::Relaxed);
        Ok(socket)
    }

    pub fn disconnect(&self) {
        *self.socket.lock().unwrap() = None;
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Record that any datagram arrived. Called from receive loops.
    pub fn touch_rx(&self) {
        *self.last_rx.lock().unwrap() = Some(Instant::now());
    }

    pub async fn send(&self, msg: &OscMessage) -> Result<()> {
        let socket = self
            .socket
            .lock()
            .unwrap()
            .clone()
            .ok_or(DriverError::NotConnected)?;
        socket
            .send(&msg.encode())
            .await
            .map_err(DriverError::Io)?;
        Ok(())
    }

    /// Reachability probe: fire `query` and watch for *any* inbound traffic
    /// within 3 s. UDP gives no connect-level signal, so the reply is the
    /// only evidence of life.
    pub async fn probe(&self, query: OscMessage) -> bool {
        let sent_at = Instant::now();
        if self.send(&query).await.is_err() {
            return false;
        }
        let deadline = sent_at + PROBE_TIMEOUT;
        while Instant::now() < deadline {
            tokio::time::sleep(PROBE_POLL).await;
            if let Some(rx) = *self.last_rx.lock().unwrap() {
                if rx >= sent_at {
                    return true;
                }
            }
        }
        debug!(addr = %self.addr, "mixer probe: no reply within timeout");
        false
    }
}
