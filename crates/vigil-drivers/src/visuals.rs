//! Visual clip server driver — HTTP REST.
//!
//! The composition document is expensive for the server to render, so reads
//! go through a 5-second cache that any mutating call invalidates. Clip and
//! column lookup is fuzzy: lowercased substring over the rendered names.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{DriverError, Result};
use crate::event::DeviceEvent;
use crate::DeviceDriver;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const CACHE_TTL: Duration = Duration::from_secs(5);

struct Inner {
    base: String,
    http: reqwest::Client,
    cache: Mutex<Option<(Instant, Value)>>,
    connected: AtomicBool,
    events: mpsc::Sender<DeviceEvent>,
}

#[derive(Clone)]
pub struct Visuals {
    inner: Arc<Inner>,
}

impl Visuals {
    pub fn new(host: &str, port: u16, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                base: format!("http://{host}:{port}"),
                http: reqwest::Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                    .unwrap_or_default(),
                cache: Mutex::new(None),
                connected: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Fetch the composition document, served from cache when fresh.
    pub async fn composition(&self) -> Result<Value> {
        if let Some((at, cached)) = self.inner.cache.lock().unwrap().clone() {
            if at.elapsed() < CACHE_TTL {
                return Ok(cached);
            }
        }

        let url = format!("{}/api/v1/composition", self.inner.base);
        let body: Value = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| {
                self.inner.connected.store(false, Ordering::Relaxed);
                DriverError::Unreachable(e.to_string())
            })?
            .error_for_status()
            .map_err(|e| DriverError::Nak(e.to_string()))?
            .json()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;

        self.inner.connected.store(true, Ordering::Relaxed);
        *self.inner.cache.lock().unwrap() = Some((Instant::now(), body.clone()));
        Ok(body)
    }

    /// Connect a clip by layer/clip indices (1-based, as the server counts).
    pub async fn connect_clip(&self, layer: u32, clip: u32) -> Result<()> {
        let url = format!(
            "{}/api/v1/composition/layers/{layer}/clips/{clip}/connect",
            self.inner.base
        );
        self.mutate(&url).await
    }

    /// Fuzzy clip launch: first clip whose name contains `name`
    /// (case-insensitive), scanning layers top to bottom.
    pub async fn connect_clip_by_name(&self, name: &str) -> Result<String> {
        let comp = self.composition().await?;
        let (layer, clip, label) = find_clip(&comp, name)
            .ok_or_else(|| DriverError::InvalidArgument(format!("no clip matching '{name}'")))?;
        self.connect_clip(layer, clip).await?;
        Ok(label)
    }

    /// Trigger a whole column by index.
    pub async fn trigger_column(&self, column: u32) -> Result<()> {
        let url = format!(
            "{}/api/v1/composition/columns/{column}/connect",
            self.inner.base
        );
        self.mutate(&url).await
    }

    /// Fuzzy column trigger by name.
    pub async fn trigger_column_by_name(&self, name: &str) -> Result<String> {
        let comp = self.composition().await?;
        let (column, label) = find_column(&comp, name)
            .ok_or_else(|| DriverError::InvalidArgument(format!("no column matching '{name}'")))?;
        self.trigger_column(column).await?;
        Ok(label)
    }

    /// Status for command replies — the telemetry snapshot has no visuals
    /// section, so this is only surfaced on demand.
    pub async fn status(&self) -> Value {
        match self.composition().await {
            Ok(comp) => serde_json::json!({
                "connected": true,
                "layers": comp["layers"].as_array().map(|a| a.len()).unwrap_or(0),
                "columns": comp["columns"].as_array().map(|a| a.len()).unwrap_or(0),
            }),
            Err(_) => serde_json::json!({ "connected": false }),
        }
    }

    async fn mutate(&self, url: &str) -> Result<()> {
        let result = self
            .inner
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| DriverError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| DriverError::Nak(e.to_string()));
        // Any mutation invalidates the cached composition.
        *self.inner.cache.lock().unwrap() = None;
        result.map(|_| ())
    }
}

#[async_trait]
impl DeviceDriver for Visuals {
    fn name(&self) -> &'static str {
        "visuals"
    }

    async fn connect(&self) -> Result<()> {
        if !self.is_reachable().await {
            return Err(DriverError::Unreachable(self.inner.base.clone()));
        }
        self.inner.connected.store(true, Ordering::Relaxed);
        let _ = self
            .inner
            .events
            .send(DeviceEvent::Connected { device: "visuals" })
            .await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::Relaxed);
        *self.inner.cache.lock().unwrap() = None;
    }

    async fn is_reachable(&self) -> bool {
        let url = format!("{}/api/v1/product", self.inner.base);
        let probe = self.inner.http.get(url).timeout(PROBE_TIMEOUT).send();
        matches!(probe.await, Ok(r) if r.status().is_success())
    }

    fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }
}

/// Scan `layers[].clips[]` for the first clip whose `name.value` contains
/// `needle` (case-insensitive). Returns 1-based (layer, clip) indices and
/// the matched label.
fn find_clip(comp: &Value, needle: &str) -> Option<(u32, u32, String)> {
    let needle = needle.to_lowercase();
    for (li, layer) in comp["layers"].as_array()?.iter().enumerate() {
        let Some(clips) = layer["clips"].as_array() else {
            continue;
        };
        for (ci, clip) in clips.iter().enumerate() {
            let label = clip["name"]["value"].as_str().unwrap_or("");
            if !label.is_empty() && label.to_lowercase().contains(&needle) {
                return Some((li as u32 + 1, ci as u32 + 1, label.to_string()));
            }
        }
    }
    None
}

fn find_column(comp: &Value, needle: &str) -> Option<(u32, String)> {
    let needle = needle.to_lowercase();
    for (i, column) in comp["columns"].as_array()?.iter().enumerate() {
        let label = column["name"]["value"].as_str().unwrap_or("");
        if !label.is_empty() && label.to_lowercase().contains(&needle) {
            return Some((i as u32 + 1, label.to_string()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_composition() -> Value {
        json!({
            "layers": [
                { "clips": [
                    { "name": { "value": "Countdown 5min" } },
                    { "name": { "value": "Worship BG Blue" } }
                ]},
                { "clips": [
                    { "name": { "value": "Sermon Lower Third" } }
                ]}
            ],
            "columns": [
                { "name": { "value": "Pre-Service" } },
                { "name": { "value": "Worship" } }
            ]
        })
    }

    #[test]
    fn clip_lookup_is_case_insensitive_substring() {
        let comp = sample_composition();
        let (layer, clip, label) = find_clip(&comp, "worship bg").unwrap();
        assert_eq!((layer, clip), (1, 2));
        assert_eq!(label, "Worship BG Blue");
    }

    #[test]
    fn clip_lookup_scans_later_layers() {
        let comp = sample_composition();
        let (layer, clip, _) = find_clip(&comp, "lower third").unwrap();
        assert_eq!((layer, clip), (2, 1));
    }

    #[test]
    fn unmatched_clip_is_none() {
        assert!(find_clip(&sample_composition(), "announcements").is_none());
    }

    #[test]
    fn column_lookup_returns_one_based_index() {
        let (column, label) = find_column(&sample_composition(), "worship").unwrap();
        assert_eq!(column, 2);
        assert_eq!(label, "Worship");
    }
}
