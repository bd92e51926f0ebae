//! Command registry — the only path commands take into the agent.
//!
//! One process-wide map of dotted command name → typed handler. Handlers
//! validate their parameters, check the device is configured, call the
//! driver, and return either a text summary or a structured object — never
//! both. Construction panics on a duplicate name, which the tests exercise,
//! so a collision can never reach production dispatch.

mod macrohost;
mod mixer;
mod preview;
mod router;
mod slides;
mod streamer;
mod switcher;
mod system;
mod visuals;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::runtime::AgentRuntime;

/// A handler's reply: a human-readable summary or a structured payload.
#[derive(Debug, Clone)]
pub enum CommandReply {
    Text(String),
    Data(Value),
}

impl CommandReply {
    pub fn into_value(self) -> Value {
        match self {
            CommandReply::Text(s) => Value::String(s),
            CommandReply::Data(v) => v,
        }
    }
}

pub type HandlerFuture<'a> = BoxFuture<'a, Result<CommandReply>>;
pub type Handler = for<'a> fn(&'a AgentRuntime, &'a Value) -> HandlerFuture<'a>;

pub struct Registry {
    handlers: HashMap<&'static str, Handler>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        let mut registry = Self {
            handlers: HashMap::with_capacity(96),
        };
        switcher::register(&mut registry);
        router::register(&mut registry);
        mixer::register(&mut registry);
        streamer::register(&mut registry);
        slides::register(&mut registry);
        visuals::register(&mut registry);
        macrohost::register(&mut registry);
        preview::register(&mut registry);
        system::register(&mut registry);
        Arc::new(registry)
    }

    pub(crate) fn add(&mut self, name: &'static str, handler: Handler) {
        if self.handlers.insert(name, handler).is_some() {
            panic!("duplicate command name: {name}");
        }
    }

    pub async fn dispatch(
        &self,
        rt: &AgentRuntime,
        command: &str,
        params: &Value,
    ) -> Result<CommandReply> {
        match self.handlers.get(command) {
            Some(handler) => handler(rt, params).await,
            None => Err(AgentError::UnknownCommand {
                name: command.to_string(),
            }),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// --- shared param extraction ----------------------------------------------

pub(crate) fn req_u64(params: &Value, field: &'static str) -> Result<u64> {
    params[field]
        .as_u64()
        .ok_or(AgentError::InvalidParams { field })
}

pub(crate) fn opt_u64(params: &Value, field: &'static str, default: u64) -> u64 {
    params[field].as_u64().unwrap_or(default)
}

pub(crate) fn req_f64(params: &Value, field: &'static str) -> Result<f64> {
    params[field]
        .as_f64()
        .ok_or(AgentError::InvalidParams { field })
}

pub(crate) fn opt_f64(params: &Value, field: &'static str, default: f64) -> f64 {
    params[field].as_f64().unwrap_or(default)
}

pub(crate) fn req_str<'a>(params: &'a Value, field: &'static str) -> Result<&'a str> {
    params[field]
        .as_str()
        .ok_or(AgentError::InvalidParams { field })
}

pub(crate) fn req_bool(params: &Value, field: &'static str) -> Result<bool> {
    params[field]
        .as_bool()
        .ok_or(AgentError::InvalidParams { field })
}

// --- device presence checks ------------------------------------------------

pub(crate) fn switcher(rt: &AgentRuntime) -> Result<&vigil_drivers::switcher::Switcher> {
    rt.switcher.as_ref().ok_or(AgentError::DeviceNotConfigured {
        device: "switcher",
    })
}

/// Routers are addressed by optional index (`router` param, default 0).
pub(crate) fn router<'a>(
    rt: &'a AgentRuntime,
    params: &Value,
) -> Result<&'a vigil_drivers::router::Router> {
    let index = opt_u64(params, "router", 0) as usize;
    rt.routers
        .get(index)
        .ok_or(AgentError::DeviceNotConfigured { device: "router" })
}

pub(crate) fn mixer(
    rt: &AgentRuntime,
) -> Result<&std::sync::Arc<dyn vigil_drivers::mixer::MixerDriver>> {
    rt.mixer
        .as_ref()
        .ok_or(AgentError::DeviceNotConfigured { device: "mixer" })
}

pub(crate) fn streamer(rt: &AgentRuntime) -> Result<&vigil_drivers::streamer::Streamer> {
    rt.streamer.as_ref().ok_or(AgentError::DeviceNotConfigured {
        device: "streamer",
    })
}

pub(crate) fn slides(rt: &AgentRuntime) -> Result<&vigil_drivers::slides::Slides> {
    rt.slides
        .as_ref()
        .ok_or(AgentError::DeviceNotConfigured { device: "slides" })
}

pub(crate) fn visuals(rt: &AgentRuntime) -> Result<&vigil_drivers::visuals::Visuals> {
    rt.visuals
        .as_ref()
        .ok_or(AgentError::DeviceNotConfigured { device: "visuals" })
}

pub(crate) fn macrohost_dev(rt: &AgentRuntime) -> Result<&vigil_drivers::macrohost::MacroHost> {
    rt.macrohost
        .as_ref()
        .ok_or(AgentError::DeviceNotConfigured {
            device: "macrohost",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use vigil_core::config::AgentConfig;

    fn empty_runtime() -> AgentRuntime {
        let (out_tx, _out_rx) = mpsc::channel(4);
        let (ev_tx, _ev_rx) = mpsc::channel(4);
        AgentRuntime::new(AgentConfig::default(), out_tx, ev_tx)
    }

    #[test]
    fn construction_has_no_duplicate_names() {
        // `add` panics on collision, so successful construction is the test.
        let registry = Registry::new();
        assert!(registry.len() >= 60, "registry has {} handlers", registry.len());
    }

    #[test]
    fn names_are_dotted_lowercase_device_groups() {
        let registry = Registry::new();
        for name in registry.names() {
            let (group, _rest) = name.split_once('.').expect("dotted name");
            assert!(
                [
                    "switcher", "router", "mixer", "streamer", "slides", "visuals",
                    "macrohost", "system", "preview", "audio"
                ]
                .contains(&group),
                "unexpected group in {name}"
            );
        }
    }

    #[test]
    fn every_parser_output_is_registered() {
        let registry = Registry::new();
        let names = registry.names();
        for command in vigil_parser::Parser::new().command_names() {
            assert!(names.contains(&command), "parser emits unregistered {command}");
        }
    }

    #[tokio::test]
    async fn unknown_command_is_typed() {
        let registry = Registry::new();
        let rt = empty_runtime();
        let err = registry
            .dispatch(&rt, "switcher.levitate", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownCommand { .. }));
    }

    #[tokio::test]
    async fn missing_device_is_typed() {
        let registry = Registry::new();
        let rt = empty_runtime();
        let err = registry
            .dispatch(&rt, "switcher.cut", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::DeviceNotConfigured { device: "switcher" }
        ));
        assert_eq!(err.code().as_str(), "device_not_configured");
    }

    #[tokio::test]
    async fn missing_param_names_the_field() {
        let registry = Registry::new();
        let (out_tx, _out_rx) = mpsc::channel(4);
        let (ev_tx, _ev_rx) = mpsc::channel(4);
        let config: AgentConfig =
            serde_json::from_str(r#"{ "switcherIp": "10.0.0.5" }"#).unwrap();
        let rt = AgentRuntime::new(config, out_tx, ev_tx);

        let err = registry
            .dispatch(&rt, "switcher.setProgram", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParams { field: "input" }));
        assert!(err.wire_message().starts_with("invalid_params"));
    }
}
