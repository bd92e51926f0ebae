//! Preview pump — periodic screenshots pushed to the relay while enabled.
//!
//! Frames whose base64 payload exceeds 150 000 chars are dropped with a
//! warning; the operator is not alerted for an oversized frame.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use vigil_core::config::{PREVIEW_INTERVAL_MS, PREVIEW_MAX_CHARS};
use vigil_protocol::frames::AgentMessage;

use crate::runtime::AgentRuntime;

const FRAME_WIDTH: u32 = 1280;
const FRAME_HEIGHT: u32 = 720;

pub async fn run(rt: Arc<AgentRuntime>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_millis(PREVIEW_INTERVAL_MS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !rt.preview_enabled.load(Ordering::Relaxed) {
                    continue;
                }
                let Some(streamer) = rt.streamer.as_ref() else {
                    continue;
                };
                let source = rt.config.preview_source.as_deref().unwrap_or("program");
                match streamer.screenshot(source, FRAME_WIDTH, FRAME_HEIGHT).await {
                    Ok(data) => {
                        if data.len() > PREVIEW_MAX_CHARS {
                            warn!(size = data.len(), "preview frame oversized, dropped");
                            continue;
                        }
                        let _ = rt
                            .outbound
                            .send(AgentMessage::PreviewFrame {
                                timestamp: Utc::now().timestamp_millis(),
                                width: FRAME_WIDTH,
                                height: FRAME_HEIGHT,
                                format: "jpeg".to_string(),
                                data,
                            })
                            .await;
                    }
                    Err(e) => debug!(error = %e, "preview capture failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
