use std::sync::atomic::Ordering;

use serde_json::{json, Value};

use super::{opt_u64, streamer, CommandReply, Registry};
use crate::error::Result;
use crate::runtime::AgentRuntime;

pub(super) fn register(r: &mut Registry) {
    r.add("preview.start", |rt, p| Box::pin(start(rt, p)));
    r.add("preview.stop", |rt, p| Box::pin(stop(rt, p)));
    r.add("preview.snapshot", |rt, p| Box::pin(snapshot(rt, p)));
}

async fn start(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    // The pump loop watches this flag; frames start on its next tick.
    streamer(rt)?;
    rt.preview_enabled.store(true, Ordering::Relaxed);
    Ok(CommandReply::Text("Preview streaming started".into()))
}

async fn stop(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    rt.preview_enabled.store(false, Ordering::Relaxed);
    Ok(CommandReply::Text("Preview streaming stopped".into()))
}

/// One-shot frame, returned inline instead of pushed to the relay.
async fn snapshot(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
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
