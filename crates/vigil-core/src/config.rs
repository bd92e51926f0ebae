use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::sealed;

// Shared timing and bound constants — both processes must agree on these.
pub const RELAY_RECONNECT_MIN_SECS: u64 = 3; // agent → relay backoff floor
pub const RELAY_RECONNECT_MAX_SECS: u64 = 60;
pub const DEVICE_RECONNECT_MIN_SECS: u64 = 2; // per-device backoff floor
pub const DEVICE_RECONNECT_MAX_SECS: u64 = 60;
pub const STATUS_INTERVAL_SECS: u64 = 30; // full telemetry broadcast cadence
pub const UPTIME_INTERVAL_SECS: u64 = 10;
pub const WATCHDOG_INTERVAL_SECS: u64 = 30;
pub const WATCHDOG_DEDUP_SECS: u64 = 300; // one alert per {venue,type} per 5 min
pub const SILENCE_POLL_SECS: u64 = 2;
pub const SILENCE_THRESHOLD_DBFS: f64 = -40.0;
pub const SILENCE_TRIGGER_SECS: u64 = 15;
pub const HEALTH_INTERVAL_SECS: u64 = 60;
pub const HEALTH_DEDUP_SECS: u64 = 600; // stream-health alerts: 10 min window
pub const PREVIEW_INTERVAL_MS: u64 = 5000;
pub const PREVIEW_MAX_CHARS: usize = 150_000; // oversized frames are dropped
pub const OFFLINE_QUEUE_TTL_SECS: i64 = 30;
pub const OFFLINE_QUEUE_CAP: usize = 10;
pub const RATE_LIMIT_PER_SEC: f64 = 10.0;
pub const RATE_LIMIT_BURST: f64 = 10.0;
pub const COMMAND_TIMEOUT_SECS: u64 = 10; // correlation waiter deadline
pub const ESCALATION_SECS: u64 = 90; // critical alert → admin copy
pub const WINDOW_BUFFER_MINS: i64 = 30; // service window slack on both ends
pub const TOKEN_VALIDITY_DAYS: i64 = 365;
pub const GUEST_TOKEN_TTL_HOURS: i64 = 24;
pub const SWAP_TTL_HOURS: i64 = 24;
pub const SESSION_SEND_BUFFER: usize = 64; // per-peer outbound cap, drop-oldest
pub const SHUTDOWN_DRAIN_SECS: u64 = 5;

/// A single video router entry in the agent config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterEntry {
    pub host: String,
    #[serde(default = "default_router_port")]
    pub port: u16,
    pub label: Option<String>,
}

/// Audio mixer connection settings. `kind` selects the driver family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixerEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub port: Option<u16>,
}

/// Streaming-platform API credentials for the stream-health monitor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlatformKeys {
    pub youtube_api_key: Option<String>,
    pub youtube_channel_id: Option<String>,
    pub facebook_page_id: Option<String>,
    pub facebook_access_token: Option<String>,
}

impl PlatformKeys {
    pub fn any_configured(&self) -> bool {
        self.youtube_api_key.is_some() || self.facebook_access_token.is_some()
    }
}

/// Agent-side persisted configuration (`~/.church-av/config.json`, camelCase
/// keys, `VIGIL_*` env overrides).
///
/// Sensitive values (`token`, `streamerPassword`, platform keys) may be stored
/// as `enc:<base64>` envelopes; [`AgentConfig::load`] unseals them in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Venue bearer token issued by the relay at registration.
    pub token: Option<String>,
    /// Relay base URL, e.g. `wss://relay.example.org`.
    pub relay: Option<String>,
    /// Human-readable venue name shown in telemetry.
    pub name: Option<String>,
    pub switcher_ip: Option<String>,
    pub streamer_url: Option<String>,
    pub streamer_password: Option<String>,
    pub macrohost_url: Option<String>,
    pub slides_host: Option<String>,
    pub slides_port: Option<u16>,
    pub visual_server_host: Option<String>,
    pub visual_server_port: Option<u16>,
    #[serde(default)]
    pub video_routers: Vec<RouterEntry>,
    pub mixer: Option<MixerEntry>,
    /// Screenshot source name for the preview pump.
    pub preview_source: Option<String>,
    #[serde(default = "bool_true")]
    pub watchdog: bool,
    #[serde(flatten)]
    pub platform: PlatformKeys,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            token: None,
            relay: None,
            name: None,
            switcher_ip: None,
            streamer_url: None,
            streamer_password: None,
            macrohost_url: None,
            slides_host: None,
            slides_port: None,
            visual_server_host: None,
            visual_server_port: None,
            video_routers: Vec::new(),
            mixer: None,
            preview_source: None,
            // The watchdog is on unless someone turns it off.
            watchdog: true,
            platform: PlatformKeys::default(),
        }
    }
}

impl AgentConfig {
    /// Load from the config file (explicit path wins over the default
    /// location) with env overrides, then unseal `enc:` envelopes.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: AgentConfig = Figment::new()
            .merge(Json::file(&path))
            .merge(Env::prefixed("VIGIL_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.unseal();
        Ok(config)
    }

    /// Decode any `enc:` envelopes in place. Plaintext values pass through.
    fn unseal(&mut self) {
        for slot in [
            &mut self.token,
            &mut self.streamer_password,
            &mut self.platform.youtube_api_key,
            &mut self.platform.facebook_access_token,
        ] {
            if let Some(v) = slot.as_deref() {
                if let Some(plain) = sealed::unseal(v) {
                    *slot = Some(plain);
                }
            }
        }
    }
}

/// Relay-side configuration. Same file format and env scheme as the agent;
/// the two processes read different sections so a shared file also works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    /// Admin API key — required on every `/api/*` request and `/controller`.
    pub api_key: String,
    /// HMAC secret for venue bearer tokens.
    pub token_secret: String,
    pub database_path: String,
    /// Default Telegram bot credential (venues may override per-venue).
    pub telegram_bot_token: Option<String>,
    /// Chat that receives emergency copies and escalations.
    pub admin_chat_id: Option<i64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8170,
            api_key: "change-me".to_string(),
            token_secret: "change-me".to_string(),
            database_path: default_db_path(),
            telegram_bot_token: None,
            admin_chat_id: None,
        }
    }
}

impl RelayConfig {
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_relay_config_path);

        let mut config: RelayConfig = Figment::new()
            .merge(Json::file(&path))
            .merge(Env::prefixed("VIGIL_RELAY_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        for slot in [&mut config.telegram_bot_token] {
            if let Some(v) = slot.as_deref() {
                if let Some(plain) = sealed::unseal(v) {
                    *slot = Some(plain);
                }
            }
        }
        if let Some(plain) = sealed::unseal(&config.token_secret) {
            config.token_secret = plain;
        }
        Ok(config)
    }
}

fn bool_true() -> bool {
    true
}

fn default_router_port() -> u16 {
    9990
}

pub fn config_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.church-av")
}

fn default_config_path() -> String {
    format!("{}/config.json", config_dir())
}

fn default_relay_config_path() -> String {
    format!("{}/relay.json", config_dir())
}

fn default_db_path() -> String {
    format!("{}/relay.db", config_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_config_reads_camel_case_keys() {
        let json = r#"{
            "token": "abc",
            "relay": "wss://relay.test",
            "switcherIp": "10.0.0.5",
            "videoRouters": [{"host": "10.0.0.6"}],
            "mixer": {"type": "behringer", "host": "10.0.0.7"},
            "watchdog": false
        }"#;
        let config: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.switcher_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.video_routers.len(), 1);
        assert_eq!(config.video_routers[0].port, 9990);
        assert_eq!(config.mixer.as_ref().unwrap().kind, "behringer");
        assert!(!config.watchdog);
    }

    #[test]
    fn watchdog_defaults_on() {
        let config: AgentConfig = serde_json::from_str("{}").unwrap();
        assert!(config.watchdog);
        assert!(!config.platform.any_configured());
    }
}
