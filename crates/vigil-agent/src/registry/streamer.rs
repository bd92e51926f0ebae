use serde_json::{json, Value};

use super::{opt_u64, req_str, streamer, CommandReply, Registry};
use crate::error::{AgentError, Result};
use crate::runtime::AgentRuntime;

pub(super) fn register(r: &mut Registry) {
    r.add("streamer.startStream", |rt, p| Box::pin(start_stream(rt, p)));
    r.add("streamer.stopStream", |rt, p| Box::pin(stop_stream(rt, p)));
    r.add("streamer.startRecord", |rt, p| Box::pin(start_record(rt, p)));
    r.add("streamer.stopRecord", |rt, p| Box::pin(stop_record(rt, p)));
    r.add("streamer.setScene", |rt, p| Box::pin(set_scene(rt, p)));
    r.add("streamer.setBitrate", |rt, p| Box::pin(set_bitrate(rt, p)));
    r.add("streamer.reduceBitrate", |rt, p| Box::pin(reduce_bitrate(rt, p)));
    r.add("streamer.screenshot", |rt, p| Box::pin(screenshot(rt, p)));
    r.add("streamer.stats", |rt, p| Box::pin(stats(rt, p)));
    r.add("streamer.status", |rt, p| Box::pin(status(rt, p)));
}

async fn start_stream(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    streamer(rt)?.start_stream().await?;
    Ok(CommandReply::Text("Stream starting".into()))
}

async fn stop_stream(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    streamer(rt)?.stop_stream().await?;
    Ok(CommandReply::Text("Stream stopping".into()))
}

async fn start_record(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    streamer(rt)?.start_record().await?;
    Ok(CommandReply::Text("Recording starting".into()))
}

async fn stop_record(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    streamer(rt)?.stop_record().await?;
    Ok(CommandReply::Text("Recording stopping".into()))
}

async fn set_scene(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let scene = req_str(params, "scene")?;
    streamer(rt)?.set_scene(scene).await?;
    Ok(CommandReply::Text(format!("Scene set to '{scene}'")))
}

async fn set_bitrate(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let bitrate = super::req_u64(params, "bitrate")? as u32;
    streamer(rt)?.set_bitrate(bitrate).await?;
    Ok(CommandReply::Text(format!("Bitrate set to {bitrate} kbps")))
}

/// Drop the outbound bitrate by a percentage of its current value. This is
/// also the auto-recovery recipe for `bitrate_low` / `fps_low`.
async fn reduce_bitrate(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let percent = opt_u64(params, "percent", 20).min(90);
    let device = streamer(rt)?;
    let current = device.current_bitrate();
    if current <= 0.0 {
        return Err(AgentError::Internal(
            "current bitrate unknown — no stats received yet".into(),
        ));
    }
    let target = (current * (1.0 - percent as f64 / 100.0)) as u32;
    device.set_bitrate(target).await?;
    Ok(CommandReply::Text(format!(
        "Bitrate reduced {percent}% to {target} kbps"
    )))
}

async fn screenshot(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let source = params["source"]
        .as_str()
        .or(rt.config.preview_source.as_deref())
        .unwrap_or("program");
    let width = opt_u64(params, "width", 1280) as u32;
    let height = opt_u64(params, "height", 720) as u32;
    let data = streamer(rt)?.screenshot(source, width, height).await?;
    Ok(CommandReply::Data(json!({
        "format": "jpeg",
        "width": width,
        "height": height,
        "data": data,
    })))
}

async fn stats(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    let status = streamer(rt)?.status();
    Ok(CommandReply::Data(json!({
        "fps": status.fps,
        "bitrate": status.bitrate,
        "cpuUsage": status.cpu_usage,
    })))
}

async fn status(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Data(json!(streamer(rt)?.status())))
}
