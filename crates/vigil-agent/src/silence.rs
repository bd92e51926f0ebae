//! Audio-silence detector.
//!
//! Every 2 s while streaming, read the switcher's master-audio level and
//! track sustained silence. Two level encodings exist in the field and both
//! must decode:
//!
//! * negative values are dBFS · 1000 (`-45000` → −45 dBFS);
//! * positive values ≤ 32768 are linear samples, converted as
//!   `20·log10(v/32768)`.
//!
//! Below −40 dBFS continuously for 15 s → one `audio_silence` alert for the
//! episode. The timer and the alert latch reset the moment the level comes
//! back or streaming stops, so a new dropout alerts again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::info;

use vigil_core::config::{SILENCE_POLL_SECS, SILENCE_THRESHOLD_DBFS, SILENCE_TRIGGER_SECS};
use vigil_core::Severity;

use crate::runtime::AgentRuntime;

/// Decode a raw master-level sample into dBFS. Values above the linear
/// ceiling are meter noise and yield `None`.
pub fn decode_level(raw: f64) -> Option<f64> {
    if raw < 0.0 {
        Some(raw / 1000.0)
    } else if raw == 0.0 {
        // A true zero sample is digital silence.
        Some(-100.0)
    } else if raw <= 32768.0 {
        Some(20.0 * (raw / 32768.0).log10())
    } else {
        None
    }
}

/// Episode tracker: fires exactly once per continuous silent stretch.
#[derive(Debug, Default)]
pub struct SilenceTracker {
    silent_since: Option<Instant>,
    alerted: bool,
}

impl SilenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded sample. Returns `true` exactly when the alert for
    /// the current episode should fire.
    pub fn sample(&mut self, dbfs: f64, now: Instant) -> bool {
        if dbfs < SILENCE_THRESHOLD_DBFS {
            let since = *self.silent_since.get_or_insert(now);
            if now.duration_since(since) >= Duration::from_secs(SILENCE_TRIGGER_SECS)
                && !self.alerted
            {
                self.alerted = true;
                return true;
            }
        } else {
            self.reset();
        }
        false
    }

    pub fn reset(&mut self) {
        self.silent_since = None;
        self.alerted = false;
    }

    pub fn is_silent(&self) -> bool {
        self.silent_since.is_some()
    }

    pub fn duration_secs(&self, now: Instant) -> u64 {
        self.silent_since
            .map(|since| now.duration_since(since).as_secs())
            .unwrap_or(0)
    }
}

pub async fn run(rt: Arc<AgentRuntime>, mut shutdown: watch::Receiver<bool>) {
    info!("audio silence detector started");
    let mut tracker = SilenceTracker::new();
    let mut interval = tokio::time::interval(Duration::from_secs(SILENCE_POLL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let monitoring = rt.audio_state.lock().unwrap().monitoring;
                if !monitoring {
                    continue;
                }
                if !rt.is_streaming() {
                    tracker.reset();
                    let mut state = rt.audio_state.lock().unwrap();
                    state.silence_detected = false;
                    state.silence_duration_sec = 0;
                    continue;
                }
                let Some(raw) = rt.switcher.as_ref().and_then(|s| s.master_audio_level()) else {
                    continue;
                };
                let Some(dbfs) = decode_level(raw) else {
                    continue;
                };

                let now = Instant::now();
                let fire = tracker.sample(dbfs, now);
                {
                    let mut state = rt.audio_state.lock().unwrap();
                    state.silence_detected = tracker.is_silent();
                    state.silence_duration_sec = tracker.duration_secs(now);
                }
                if fire {
                    rt.emit_alert(
                        "audio_silence",
                        Severity::Warning,
                        format!(
                            "Master audio below {SILENCE_THRESHOLD_DBFS:.0} dBFS for {SILENCE_TRIGGER_SECS}+ seconds while streaming"
                        ),
                        Duration::from_secs(0),
                    )
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

    #[test]
    fn negative_encoding_is_millidbfs() {
        assert_eq!(decode_level(-45_000.0), Some(-45.0));
        assert_eq!(decode_level(-400.0), Some(-0.4));
    }

    #[test]
    fn positive_encoding_is_linear() {
        let full_scale = decode_level(32768.0).unwrap();
        assert!(full_scale.abs() < 1e-9);
        let half = decode_level(16384.0).unwrap();
        assert!((half - -6.0206).abs() < 0.001);
        assert_eq!(decode_level(0.0), Some(-100.0));
    }

    #[test]
    fn oversized_positive_values_are_rejected() {
        assert!(decode_level(40_000.0).is_none());
    }

    #[test]
    fn fires_only_after_fifteen_continuous_seconds() {
        let mut tracker = SilenceTracker::new();
        let base = Instant::now();
        // 14.9 s of silence: no alert.
        assert!(!tracker.sample(-45.0, base));
        assert!(!tracker.sample(-45.0, base + Duration::from_millis(14_900)));
        // Crossing 15 s: exactly one alert.
        assert!(tracker.sample(-45.0, base + Duration::from_millis(15_100)));
        // Four more minutes of the same episode: nothing new.
        assert!(!tracker.sample(-45.0, base + Duration::from_secs(60)));
        assert!(!tracker.sample(-45.0, base + Duration::from_secs(255)));
    }

    #[test]
    fn recovery_starts_a_fresh_episode() {
        let mut tracker = SilenceTracker::new();
        let base = Instant::now();
        tracker.sample(-45.0, base);
        assert!(tracker.sample(-45.0, base + Duration::from_secs(16)));
        // Loud sample resets the latch.
        assert!(!tracker.sample(-20.0, base + Duration::from_secs(17)));
        assert!(!tracker.is_silent());
        // A new 15 s stretch alerts again.
        assert!(!tracker.sample(-45.0, base + Duration::from_secs(18)));
        assert!(tracker.sample(-45.0, base + Duration::from_secs(34)));
    }

    #[test]
    fn loud_audio_never_fires() {
        let mut tracker = SilenceTracker::new();
        let base = Instant::now();
        for i in 0..20 {
            assert!(!tracker.sample(-12.0, base + Duration::from_secs(i * 2)));
        }
        assert_eq!(tracker.duration_secs(base + Duration::from_secs(40)), 0);
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        let mut tracker = SilenceTracker::new();
        let base = Instant::now();
        // Exactly −40 is not silence.
        assert!(!tracker.sample(-40.0, base));
        assert!(!tracker.is_silent());
        // Just below is.
        assert!(!tracker.sample(-40.1, base));
        assert!(tracker.is_silent());
    }
}
