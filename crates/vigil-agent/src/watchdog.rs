//! Watchdog — a 30-second sweep over the telemetry snapshot.
//!
//! The tick only evaluates and emits alerts; it never mutates device state.
//! Each alert type is deduped per 5 minutes; the dedup entry is cleared by
//! the event pump when the device reconnects, so a flap alerts once per
//! outage rather than once per window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use vigil_core::config::{WATCHDOG_DEDUP_SECS, WATCHDOG_INTERVAL_SECS};
use vigil_core::Severity;
use vigil_protocol::telemetry::TelemetrySnapshot;

use crate::runtime::AgentRuntime;

const FPS_FLOOR: f64 = 24.0;
const BITRATE_FLOOR_KBPS: f64 = 1000.0;
const CPU_CEILING: f64 = 90.0;
const EMERGENCY_ISSUE_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub alert_type: &'static str,
    pub severity: Severity,
    pub message: String,
}

/// Evaluate the rule table against one snapshot. Pure — the loop and the
/// tests share it. A section's presence in the snapshot means the device
/// is configured.
pub fn find_issues(snap: &TelemetrySnapshot) -> Vec<Issue> {
    let mut issues = Vec::new();

    if let Some(streamer) = &snap.streamer {
        if streamer.connected && streamer.streaming {
            if streamer.fps < FPS_FLOOR {
                issues.push(Issue {
                    alert_type: "fps_low",
                    severity: Severity::Warning,
                    message: format!("FPS at {:.1} while streaming", streamer.fps),
                });
            }
            if streamer.bitrate < BITRATE_FLOOR_KBPS {
                issues.push(Issue {
                    alert_type: "bitrate_low",
                    severity: Severity::Warning,
                    message: format!("Bitrate at {:.0} kbps while streaming", streamer.bitrate),
                });
            }
            if streamer.cpu_usage > CPU_CEILING {
                issues.push(Issue {
                    alert_type: "cpu_high",
                    severity: Severity::Warning,
                    message: format!("Encoder CPU at {:.0}%", streamer.cpu_usage),
                });
            }
        }
        if !streamer.connected {
            issues.push(Issue {
                alert_type: "streamer_disconnected",
                severity: Severity::Warning,
                message: "Streaming software is not responding".to_string(),
            });
        }
    }

    if let Some(switcher) = &snap.switcher {
        if !switcher.connected {
            issues.push(Issue {
                alert_type: "switcher_disconnected",
                severity: Severity::Critical,
                message: "Switcher connection lost".to_string(),
            });
        }
    }

    if let Some(mixer) = &snap.mixer {
        if !mixer.connected {
            issues.push(Issue {
                alert_type: "mixer_disconnected",
                severity: Severity::Warning,
                message: "Audio mixer is not responding".to_string(),
            });
        }
    }

    issues
}

pub async fn run(rt: Arc<AgentRuntime>, mut shutdown: watch::Receiver<bool>) {
    info!("watchdog started");
    let mut interval = tokio::time::interval(Duration::from_secs(WATCHDOG_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let window = Duration::from_secs(WATCHDOG_DEDUP_SECS);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = rt.snapshot();
                let issues = find_issues(&snapshot);

                if issues.len() >= EMERGENCY_ISSUE_COUNT {
                    let summary = issues
                        .iter()
                        .map(|i| i.alert_type)
                        .collect::<Vec<_>>()
                        .join(", ");
                    rt.emit_alert(
                        "multiple_systems_down",
                        Severity::Emergency,
                        format!("{} concurrent issues: {summary}", issues.len()),
                        window,
                    )
                    .await;
                }

                for issue in issues {
                    rt.emit_alert(issue.alert_type, issue.severity, issue.message, window)
                        .await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_protocol::telemetry::{StreamerStatus, SwitcherStatus};

    fn streaming(fps: f64, bitrate: f64, cpu: f64) -> StreamerStatus {
        StreamerStatus {
            connected: true,
            streaming: true,
            recording: false,
            fps,
            bitrate,
            cpu_usage: cpu,
        }
    }

    #[test]
    fn healthy_snapshot_has_no_issues() {
        let snap = TelemetrySnapshot {
            streamer: Some(streaming(30.0, 4500.0, 40.0)),
            switcher: Some(SwitcherStatus {
                connected: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(find_issues(&snap).is_empty());
    }

    #[test]
    fn low_fps_and_bitrate_flag_while_streaming() {
        let snap = TelemetrySnapshot {
            streamer: Some(streaming(18.0, 750.0, 40.0)),
            ..Default::default()
        };
        let issues = find_issues(&snap);
        let types: Vec<_> = issues.iter().map(|i| i.alert_type).collect();
        assert_eq!(types, vec!["fps_low", "bitrate_low"]);
    }

    #[test]
    fn quality_rules_silent_when_not_streaming() {
        let snap = TelemetrySnapshot {
            streamer: Some(StreamerStatus {
                connected: true,
                streaming: false,
                fps: 0.0,
                bitrate: 0.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(find_issues(&snap).is_empty());
    }

    #[test]
    fn disconnected_switcher_is_critical() {
        let snap = TelemetrySnapshot {
            switcher: Some(SwitcherStatus::default()),
            ..Default::default()
        };
        let issues = find_issues(&snap);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].alert_type, "switcher_disconnected");
        assert_eq!(issues[0].severity, Severity::Critical);
    }

    #[test]
    fn disconnected_mixer_is_warning() {
        let snap = TelemetrySnapshot {
            mixer: Some(vigil_protocol::telemetry::MixerStatus::default()),
            ..Default::default()
        };
        let issues = find_issues(&snap);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].alert_type, "mixer_disconnected");
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn unconfigured_devices_never_flag() {
        assert!(find_issues(&TelemetrySnapshot::default()).is_empty());
    }

    #[test]
    fn three_issues_reach_the_emergency_threshold() {
        let snap = TelemetrySnapshot {
            streamer: Some(streaming(18.0, 750.0, 95.0)),
            ..Default::default()
        };
        let issues = find_issues(&snap);
        assert!(issues.len() >= EMERGENCY_ISSUE_COUNT);
    }
}
