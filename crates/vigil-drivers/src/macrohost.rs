//! Macro host driver — HTTP REST over a programmable button grid.
//!
//! The grid is polymorphic (pages of arbitrary buttons), so the only stable
//! addressing scheme is the rendered button text. `press_by_name` scans the
//! first 10 pages and presses the first button whose text contains the
//! requested substring, case-insensitive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{DriverError, Result};
use crate::event::DeviceEvent;
use crate::DeviceDriver;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const PAGE_SCAN_LIMIT: u32 = 10;

struct Inner {
    base: String,
    http: reqwest::Client,
    connected: AtomicBool,
    events: mpsc::Sender<DeviceEvent>,
}

#[derive(Clone)]
pub struct MacroHost {
    inner: Arc<Inner>,
}

impl MacroHost {
    pub fn new(url: &str, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                base: url.trim_end_matches('/').to_string(),
                http: reqwest::Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                    .unwrap_or_default(),
                connected: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Press a button by its id (page-local address).
    pub async fn press(&self, button_id: &str) -> Result<()> {
        let url = format!("{}/api/button/{button_id}/press", self.inner.base);
        self.inner
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| {
                self.inner.connected.store(false, Ordering::Relaxed);
                DriverError::Unreachable(e.to_string())
            })?
            .error_for_status()
            .map_err(|e| DriverError::Nak(e.to_string()))?;
        Ok(())
    }

    /// Fuzzy press: scan pages 1–10 for the first button whose rendered
    /// text contains `name`. Returns the matched text.
    pub async fn press_by_name(&self, name: &str) -> Result<String> {
        let needle = name.to_lowercase();
        for page in 1..=PAGE_SCAN_LIMIT {
            let buttons = match self.page_buttons(page).await {
                Ok(b) => b,
                Err(e) => {
                    // Missing pages are normal on small grids.
                    debug!(page, error = %e, "macrohost: page scan skipped");
                    continue;
                }
            };
            for button in buttons {
                let text = button["text"].as_str().unwrap_or("");
                if !text.is_empty() && text.to_lowercase().contains(&needle) {
                    let id = button["id"]
                        .as_str()
                        .ok_or_else(|| DriverError::Protocol("button missing id".into()))?;
                    self.press(id).await?;
                    return Ok(text.to_string());
                }
            }
        }
        Err(DriverError::InvalidArgument(format!(
            "no button matching '{name}' on pages 1-{PAGE_SCAN_LIMIT}"
        )))
    }

    async fn page_buttons(&self, page: u32) -> Result<Vec<Value>> {
        let url = format!("{}/api/page/{page}/buttons", self.inner.base);
        let body: Value = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DriverError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| DriverError::Nak(e.to_string()))?
            .json()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }
}

#[async_trait]
impl DeviceDriver for MacroHost {
    fn name(&self) -> &'static str {
        "macrohost"
    }

    async fn connect(&self) -> Result<()> {
        if !self.is_reachable().await {
            return Err(DriverError::Unreachable(self.inner.base.clone()));
        }
        self.inner.connected.store(true, Ordering::Relaxed);
        let _ = self
            .inner
            .events
            .send(DeviceEvent::Connected { device: "macrohost" })
            .await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::Relaxed);
    }

    async fn is_reachable(&self) -> bool {
        let url = format!("{}/api/ping", self.inner.base);
        let probe = self.inner.http.get(url).timeout(PROBE_TIMEOUT).send();
        matches!(probe.await, Ok(r) if r.status().is_success())
    }

    fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }
}
