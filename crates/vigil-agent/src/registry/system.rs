use serde_json::{json, Map, Value};
use vigil_drivers::DeviceDriver;

use super::{CommandReply, Registry};
use crate::error::Result;
use crate::runtime::AgentRuntime;

pub(super) fn register(r: &mut Registry) {
    r.add("system.status", |rt, p| Box::pin(status(rt, p)));
    r.add("system.uptime", |rt, p| Box::pin(uptime(rt, p)));
    r.add("system.ping", |rt, p| Box::pin(ping(rt, p)));
    r.add("system.devices", |rt, p| Box::pin(devices(rt, p)));
    r.add("system.info", |rt, p| Box::pin(info(rt, p)));
    r.add("system.preServiceCheck", |rt, p| Box::pin(pre_service_check(rt, p)));
    r.add("audio.startMonitoring", |rt, p| Box::pin(audio_start(rt, p)));
    r.add("audio.stopMonitoring", |rt, p| Box::pin(audio_stop(rt, p)));
    r.add("audio.status", |rt, p| Box::pin(audio_status(rt, p)));
}

async fn status(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Data(json!(rt.snapshot())))
}

async fn uptime(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    let secs = rt.uptime_secs();
    Ok(CommandReply::Text(format!(
        "Agent up {}h {}m {}s",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )))
}

async fn ping(_rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Text("pong".into()))
}

async fn devices(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    let mut list = Vec::new();
    if let Some(sw) = &rt.switcher {
        list.push(json!({ "device": "switcher", "connected": sw.connected() }));
    }
    for (i, router) in rt.routers.iter().enumerate() {
        list.push(json!({ "device": "router", "index": i, "connected": router.connected() }));
    }
    if let Some(mixer) = &rt.mixer {
        list.push(json!({ "device": "mixer", "connected": mixer.connected() }));
    }
    if let Some(streamer) = &rt.streamer {
        list.push(json!({ "device": "streamer", "connected": streamer.connected() }));
    }
    if let Some(slides) = &rt.slides {
        list.push(json!({ "device": "slides", "connected": slides.connected() }));
    }
    if let Some(visuals) = &rt.visuals {
        list.push(json!({ "device": "visuals", "connected": visuals.connected() }));
    }
    if let Some(macrohost) = &rt.macrohost {
        list.push(json!({ "device": "macrohost", "connected": macrohost.connected() }));
    }
    Ok(CommandReply::Data(Value::Array(list)))
}

async fn info(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Data(json!({
        "name": rt.config.name,
        "version": env!("CARGO_PKG_VERSION"),
        "watchdog": rt.config.watchdog,
        "uptimeSec": rt.uptime_secs(),
    })))
}

/// Exercise every configured device and report per-subsystem verdicts.
/// The relay formats this into the pre-service Telegram message, so the
/// shape is `{ subsystem: { ok, detail } }`.
async fn pre_service_check(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    let mut report = Map::new();

    if let Some(sw) = &rt.switcher {
        let reachable = sw.is_reachable().await;
        let status = sw.status();
        let detail = if reachable {
            format!("connected, program input {}", status.program_input)
        } else {
            "not reachable".to_string()
        };
        report.insert("switcher".into(), json!({ "ok": reachable, "detail": detail }));
    }

    if let Some(streamer) = &rt.streamer {
        let status = streamer.status();
        let detail = if !status.connected {
            "not connected".to_string()
        } else if status.streaming {
            format!("already streaming at {:.0} kbps", status.bitrate)
        } else {
            "connected, ready to stream".to_string()
        };
        report.insert(
            "streamer".into(),
            json!({ "ok": status.connected, "detail": detail }),
        );
    }

    if let Some(slides) = &rt.slides {
        let reachable = slides.is_reachable().await;
        let detail = if reachable {
            match slides.status().current_presentation {
                Some(name) => format!("'{name}' loaded"),
                None => "reachable, no presentation loaded".to_string(),
            }
        } else {
            "not reachable".to_string()
        };
        report.insert("slides".into(), json!({ "ok": reachable, "detail": detail }));
    }

    for (i, router) in rt.routers.iter().enumerate() {
        let status = router.status();
        let key = if rt.routers.len() == 1 {
            "router".to_string()
        } else {
            format!("router{i}")
        };
        let detail = if status.connected {
            format!("{} routes active", status.route_count)
        } else {
            "not connected".to_string()
        };
        report.insert(key, json!({ "ok": status.connected, "detail": detail }));
    }

    if let Some(mixer) = &rt.mixer {
        let status = mixer.status();
        let detail = if !status.connected {
            "not connected".to_string()
        } else if status.main_muted {
            "connected, but the MAIN BUS IS MUTED".to_string()
        } else {
            "connected, main bus live".to_string()
        };
        report.insert(
            "mixer".into(),
            json!({ "ok": status.connected && !status.main_muted, "detail": detail }),
        );
    }

    Ok(CommandReply::Data(Value::Object(report)))
}

async fn audio_start(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    rt.audio_state.lock().unwrap().monitoring = true;
    Ok(CommandReply::Text("Audio silence monitoring on".into()))
}

async fn audio_stop(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    let mut state = rt.audio_state.lock().unwrap();
    state.monitoring = false;
    state.silence_detected = false;
    state.silence_duration_sec = 0;
    Ok(CommandReply::Text("Audio silence monitoring off".into()))
}

async fn audio_status(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    let state = rt.audio_state.lock().unwrap().clone();
    Ok(CommandReply::Data(json!(state)))
}
