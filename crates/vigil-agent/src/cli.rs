use clap::{ArgAction, Parser, Subcommand};

use vigil_core::config::AgentConfig;

/// Venue-side agent for the Vigil command-and-telemetry bus.
#[derive(Debug, Parser)]
#[command(name = "vigil-agent", version, about)]
pub struct Cli {
    /// Venue bearer token issued at registration.
    #[arg(long)]
    pub token: Option<String>,

    /// Relay base URL, e.g. wss://relay.example.org
    #[arg(long)]
    pub relay: Option<String>,

    #[arg(long = "switcher-ip")]
    pub switcher_ip: Option<String>,

    #[arg(long = "streamer-url")]
    pub streamer_url: Option<String>,

    #[arg(long = "streamer-password")]
    pub streamer_password: Option<String>,

    /// Human-readable venue name shown in telemetry.
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long = "macrohost-url")]
    pub macrohost_url: Option<String>,

    /// Screenshot source for the preview pump.
    #[arg(long = "preview-source")]
    pub preview_source: Option<String>,

    /// Config file path (default: ~/.church-av/config.json).
    #[arg(long)]
    pub config: Option<String>,

    /// Force the watchdog on.
    #[arg(long, action = ArgAction::SetTrue, overrides_with = "no_watchdog")]
    pub watchdog: bool,

    /// Disable the watchdog.
    #[arg(long = "no-watchdog", action = ArgAction::SetTrue)]
    pub no_watchdog: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a starter config file and print what to fill in.
    Setup,
}

impl Cli {
    /// Flags override file values; absent flags leave the file alone.
    pub fn apply(&self, config: &mut AgentConfig) {
        if self.token.is_some() {
            config.token = self.token.clone();
        }
        if self.relay.is_some() {
            config.relay = self.relay.clone();
        }
        if self.switcher_ip.is_some() {
            config.switcher_ip = self.switcher_ip.clone();
        }
        if self.streamer_url.is_some() {
            config.streamer_url = self.streamer_url.clone();
        }
        if self.streamer_password.is_some() {
            config.streamer_password = self.streamer_password.clone();
        }
        if self.name.is_some() {
            config.name = self.name.clone();
        }
        if self.macrohost_url.is_some() {
            config.macrohost_url = self.macrohost_url.clone();
        }
        if self.preview_source.is_some() {
            config.preview_source = self.preview_source.clone();
        }
        if self.watchdog {
            config.watchdog = true;
        }
        if self.no_watchdog {
            config.watchdog = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::parse_from([
            "vigil-agent",
            "--token",
            "tok-cli",
            "--switcher-ip",
            "10.0.0.9",
            "--no-watchdog",
        ]);
        let mut config: AgentConfig =
            serde_json::from_str(r#"{ "token": "tok-file", "relay": "wss://r" }"#).unwrap();
        cli.apply(&mut config);
        assert_eq!(config.token.as_deref(), Some("tok-cli"));
        assert_eq!(config.relay.as_deref(), Some("wss://r"));
        assert_eq!(config.switcher_ip.as_deref(), Some("10.0.0.9"));
        assert!(!config.watchdog);
    }

    #[test]
    fn watchdog_flag_pair_resolves() {
        let cli = Cli::parse_from(["vigil-agent", "--no-watchdog", "--watchdog"]);
        let mut config = AgentConfig::default();
        cli.apply(&mut config);
        assert!(config.watchdog);
    }
}
