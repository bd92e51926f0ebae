use serde::{Deserialize, Serialize};

/// Full per-venue telemetry snapshot, assembled by the agent every 30 s and
/// on demand after reconnects. Sections are absent when the corresponding
/// device is not configured. Monotonically replaced — no history retained.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switcher: Option<SwitcherStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streamer: Option<StreamerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slides: Option<SlidesStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mixer: Option<MixerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_health: Option<StreamHealthStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitcherStatus {
    pub connected: bool,
    pub program_input: u16,
    pub preview_input: u16,
    pub recording: bool,
    pub faded_to_black: bool,
    pub in_transition: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamerStatus {
    pub connected: bool,
    pub streaming: bool,
    pub recording: bool,
    pub fps: f64,
    /// Outbound bitrate in kbps.
    pub bitrate: f64,
    pub cpu_usage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SlidesStatus {
    pub connected: bool,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_presentation: Option<String>,
    pub slide_index: u32,
    pub slide_total: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterStatus {
    pub connected: bool,
    pub route_count: u32,
    pub inputs: u32,
    pub outputs: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MixerStatus {
    pub connected: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub main_muted: bool,
    /// Main fader position, 0.0–1.0.
    pub main_fader: f64,
}

/// Audio-silence watchdog state, not a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioStatus {
    pub monitoring: bool,
    pub silence_detected: bool,
    pub silence_duration_sec: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamHealthStatus {
    pub monitoring: bool,
    pub baseline_bitrate: f64,
    pub recent_bitrate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemStatus {
    pub hostname: String,
    pub platform: String,
    pub uptime_sec: u64,
    pub name: String,
}

impl TelemetrySnapshot {
    /// True when the streamer section reports an active outbound stream.
    pub fn is_streaming(&self) -> bool {
        self.streamer.as_ref().map(|s| s.streaming).unwrap_or(false)
    }
}
