//! Stream-health monitor — a 60-second check while streaming.
//!
//! Two independent probes:
//!
//! * **Platform liveness** — when a YouTube or Facebook API credential is
//!   configured, ask the platform whether a broadcast is actually live.
//!   The encoder can happily push bytes at a dead ingest for hours;
//!   only the platform knows nobody is receiving them.
//! * **Bitrate collapse** — current bitrate under 40% of the previous
//!   window's, with the previous window above 500 kbps.
//!
//! Both alert keys are deduped per 10 minutes. Probe transport failures are
//! logged and treated as "no verdict" — a flaky API must never page anyone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use vigil_core::config::{HEALTH_DEDUP_SECS, HEALTH_INTERVAL_SECS, PlatformKeys};
use vigil_core::Severity;

use crate::runtime::AgentRuntime;

const BITRATE_DROP_RATIO: f64 = 0.4;
const BITRATE_BASELINE_FLOOR: f64 = 500.0;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Collapse rule, kept pure for the tests.
pub fn bitrate_dropped(previous: f64, current: f64) -> bool {
    previous > BITRATE_BASELINE_FLOOR && current < previous * BITRATE_DROP_RATIO
}

pub async fn run(rt: Arc<AgentRuntime>, mut shutdown: watch::Receiver<bool>) {
    info!("stream-health monitor started");
    let http = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .unwrap_or_default();
    let mut previous_bitrate = 0.0_f64;
    let window = Duration::from_secs(HEALTH_DEDUP_SECS);
    let mut interval = tokio::time::interval(Duration::from_secs(HEALTH_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !rt.is_streaming() {
                    previous_bitrate = 0.0;
                    rt.health_state.lock().unwrap().monitoring = false;
                    continue;
                }
                let current = rt
                    .streamer
                    .as_ref()
                    .map(|s| s.current_bitrate())
                    .unwrap_or(0.0);
                {
                    let mut state = rt.health_state.lock().unwrap();
                    state.monitoring = true;
                    state.baseline_bitrate = previous_bitrate;
                    state.recent_bitrate = current;
                }

                if rt.config.platform.any_configured() {
                    if let Some(false) = platform_live(&http, &rt.config.platform).await {
                        rt.emit_alert(
                            "platform_no_broadcast",
                            Severity::Warning,
                            "Encoder reports streaming but the platform shows no live broadcast"
                                .to_string(),
                            window,
                        )
                        .await;
                    }
                }

                if bitrate_dropped(previous_bitrate, current) {
                    rt.emit_alert(
                        "bitrate_drop",
                        Severity::Warning,
                        format!(
                            "Bitrate fell from {previous_bitrate:.0} to {current:.0} kbps"
                        ),
                        window,
                    )
                    .await;
                }
                previous_bitrate = current;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// `Some(true)` = a live broadcast exists, `Some(false)` = platform answered
/// and nothing is live, `None` = no verdict (transport failure or no keys).
async fn platform_live(http: &reqwest::Client, keys: &PlatformKeys) -> Option<bool> {
    if let (Some(api_key), Some(channel)) = (&keys.youtube_api_key, &keys.youtube_channel_id) {
        let url = format!(
            "https://www.googleapis.com/youtube/v3/liveBroadcasts\
             ?part=id&broadcastStatus=active&channelId={channel}&key={api_key}"
        );
        match http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    let live = body["items"].as_array().map(|a| !a.is_empty()).unwrap_or(false);
                    return Some(live);
                }
            }
            Ok(resp) => debug!(status = %resp.status(), "youtube probe rejected"),
            Err(e) => debug!(error = %e, "youtube probe failed"),
        }
    }

    if let (Some(page), Some(token)) = (&keys.facebook_page_id, &keys.facebook_access_token) {
        let url = format!(
            "https://graph.facebook.com/v19.0/{page}/live_videos\
             ?broadcast_status=%5B%22LIVE%22%5D&access_token={token}"
        );
        match http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    let live = body["data"].as_array().map(|a| !a.is_empty()).unwrap_or(false);
                    return Some(live);
                }
            }
            Ok(resp) => debug!(status = %resp.status(), "facebook probe rejected"),
            Err(e) => debug!(error = %e, "facebook probe failed"),
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_needs_both_conditions() {
        // 4000 → 1500 is below 40%: drop.
        assert!(bitrate_dropped(4000.0, 1500.0));
        // 4000 → 1700 is above 40%: fine.
        assert!(!bitrate_dropped(4000.0, 1700.0));
        // Baseline too low to judge.
        assert!(!bitrate_dropped(400.0, 50.0));
        // First window has no baseline.
        assert!(!bitrate_dropped(0.0, 3000.0));
    }

    #[test]
    fn boundary_is_strict() {
        // Exactly 40% is not a drop.
        assert!(!bitrate_dropped(1000.0, 400.0));
        assert!(bitrate_dropped(1000.0, 399.9));
        // Baseline must exceed 500.
        assert!(!bitrate_dropped(500.0, 100.0));
        assert!(bitrate_dropped(500.1, 100.0));
    }
}
