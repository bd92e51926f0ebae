//! Per-type guidance baked into notifications, and the auto-fix recipes
//! the pipeline may attempt before anyone is paged.

use serde_json::{json, Value};

/// An automatic recovery attempt tried before notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFix {
    /// Ask the streamer to drop its outbound bitrate by this percentage.
    ReduceBitrate { percent: u32 },
}

impl AutoFix {
    /// The agent command this fix dispatches.
    pub fn command(&self) -> (&'static str, Value) {
        match self {
            AutoFix::ReduceBitrate { percent } => {
                ("streamer.reduceBitrate", json!({ "percent": percent }))
            }
        }
    }
}

pub struct Recipe {
    pub likely_cause: &'static str,
    pub steps: &'static [&'static str],
    pub auto_fix: Option<AutoFix>,
}

/// Guidance table. Types without an entry get a generic notification with
/// no steps and no auto-fix.
pub fn recipe_for(alert_type: &str) -> Option<&'static Recipe> {
    match alert_type {
        "stream_stopped" => Some(&Recipe {
            likely_cause: "The encoder dropped the platform connection, or someone pressed Stop.",
            steps: &[
                "Check the streaming software is still running",
                "Press Start Streaming if it shows stopped",
                "Check the venue's internet connection (speed test)",
                "If the platform shows the stream live, ignore this alert and ack it",
            ],
            auto_fix: None,
        }),
        "bitrate_low" => Some(&Recipe {
            likely_cause: "Upload bandwidth dipped below what the encoder needs.",
            steps: &[
                "Check whether anything else on the network is uploading",
                "Viewers will see reduced quality but the stream stays up",
                "If it persists past the service, raise it with the ISP",
            ],
            auto_fix: Some(AutoFix::ReduceBitrate { percent: 20 }),
        }),
        "fps_low" => Some(&Recipe {
            likely_cause: "The encoding machine cannot keep up — CPU or GPU is saturated.",
            steps: &[
                "Close any applications that are not needed for the stream",
                "Check CPU usage on the encoding machine",
                "Lower the output resolution if it keeps dropping",
            ],
            auto_fix: Some(AutoFix::ReduceBitrate { percent: 20 }),
        }),
        "cpu_high" => Some(&Recipe {
            likely_cause: "Encoding load is close to the machine's limit.",
            steps: &[
                "Close background applications on the encoder",
                "Watch for dropped frames in the streaming software",
            ],
            auto_fix: None,
        }),
        "switcher_disconnected" => Some(&Recipe {
            likely_cause: "The switcher lost power or its network link.",
            steps: &[
                "Check the switcher's power and network cables",
                "Confirm the switcher control panel still responds",
                "Power-cycle the switcher if nothing else works",
            ],
            auto_fix: None,
        }),
        "streamer_disconnected" => Some(&Recipe {
            likely_cause: "The streaming software closed or stopped responding.",
            steps: &[
                "Check the streaming software is running on the encoder",
                "Restart it if it has crashed — settings are preserved",
            ],
            auto_fix: None,
        }),
        "recording_failed" => Some(&Recipe {
            likely_cause: "The recording target is full or went away.",
            steps: &[
                "Check free disk space on the recording drive",
                "Check the drive is still mounted",
                "Restart the recording once space is available",
            ],
            auto_fix: None,
        }),
        "audio_silence" => Some(&Recipe {
            likely_cause: "The master audio bus has been silent while streaming.",
            steps: &[
                "Check the mixer's main fader and mute state",
                "Check the audio cable into the switcher",
                "Confirm the stream's audio meter is moving",
            ],
            auto_fix: None,
        }),
        "platform_no_broadcast" => Some(&Recipe {
            likely_cause: "The encoder thinks it is streaming but the platform shows nothing live.",
            steps: &[
                "Open the platform's live dashboard and check for an active broadcast",
                "Check the stream key has not expired or changed",
                "Stop and restart the stream if the platform shows nothing",
            ],
            auto_fix: None,
        }),
        "bitrate_drop" => Some(&Recipe {
            likely_cause: "Outbound bitrate fell sharply against its recent baseline.",
            steps: &[
                "Check the venue's upload bandwidth",
                "Watch the stream health graph for recovery",
            ],
            auto_fix: None,
        }),
        "macrohost_disconnected" => Some(&Recipe {
            likely_cause: "The button controller dropped off the network.",
            steps: &[
                "Check the controller's USB/network connection",
                "Restart the companion software if buttons are dark",
            ],
            auto_fix: None,
        }),
        "multiple_systems_down" => Some(&Recipe {
            likely_cause: "Several systems failed together — likely network or power at the venue.",
            steps: &[
                "Check venue power and the main network switch first",
                "Call the venue — this usually needs hands on site",
            ],
            auto_fix: None,
        }),
        "no_td_response" => Some(&Recipe {
            likely_cause: "A critical alert went unacknowledged past its window.",
            steps: &[
                "Call the on-call TD directly",
                "Check the venue stream yourself while you reach them",
            ],
            auto_fix: None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_fix_only_on_bitrate_and_fps() {
        assert!(recipe_for("bitrate_low").unwrap().auto_fix.is_some());
        assert!(recipe_for("fps_low").unwrap().auto_fix.is_some());
        assert!(recipe_for("stream_stopped").unwrap().auto_fix.is_none());
        assert!(recipe_for("switcher_disconnected").unwrap().auto_fix.is_none());
    }

    #[test]
    fn steps_stay_between_two_and_four() {
        for t in [
            "stream_stopped",
            "bitrate_low",
            "fps_low",
            "cpu_high",
            "switcher_disconnected",
            "streamer_disconnected",
            "recording_failed",
            "audio_silence",
            "platform_no_broadcast",
            "bitrate_drop",
            "macrohost_disconnected",
            "multiple_systems_down",
            "no_td_response",
        ] {
            let recipe = recipe_for(t).unwrap();
            assert!(
                (2..=4).contains(&recipe.steps.len()),
                "{t} has {} steps",
                recipe.steps.len()
            );
        }
    }

    #[test]
    fn reduce_bitrate_command_shape() {
        let (command, params) = AutoFix::ReduceBitrate { percent: 20 }.command();
        assert_eq!(command, "streamer.reduceBitrate");
        assert_eq!(params["percent"], 20);
    }

    #[test]
    fn unknown_type_has_no_recipe() {
        assert!(recipe_for("quantum_flux_detected").is_none());
    }
}
