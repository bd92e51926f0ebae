use serde_json::{json, Value};

use super::{req_str, req_u64, visuals, CommandReply, Registry};
use crate::error::Result;
use crate::runtime::AgentRuntime;

pub(super) fn register(r: &mut Registry) {
    r.add("visuals.playClip", |rt, p| Box::pin(play_clip(rt, p)));
    r.add("visuals.playClipAt", |rt, p| Box::pin(play_clip_at(rt, p)));
    r.add("visuals.triggerColumn", |rt, p| Box::pin(trigger_column(rt, p)));
    r.add("visuals.triggerColumnAt", |rt, p| Box::pin(trigger_column_at(rt, p)));
    r.add("visuals.composition", |rt, p| Box::pin(composition(rt, p)));
    r.add("visuals.status", |rt, p| Box::pin(status(rt, p)));
}

async fn play_clip(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let name = req_str(params, "name")?;
    let matched = visuals(rt)?.connect_clip_by_name(name).await?;
    Ok(CommandReply::Text(format!("Playing '{matched}'")))
}

async fn play_clip_at(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let layer = req_u64(params, "layer")? as u32;
    let clip = req_u64(params, "clip")? as u32;
    visuals(rt)?.connect_clip(layer, clip).await?;
    Ok(CommandReply::Text(format!("Playing layer {layer} clip {clip}")))
}

async fn trigger_column(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let name = req_str(params, "name")?;
    let matched = visuals(rt)?.trigger_column_by_name(name).await?;
    Ok(CommandReply::Text(format!("Column '{matched}' triggered")))
}

async fn trigger_column_at(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let column = req_u64(params, "column")? as u32;
    visuals(rt)?.trigger_column(column).await?;
    Ok(CommandReply::Text(format!("Column {column} triggered")))
}

async fn composition(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Data(visuals(rt)?.composition().await?))
}

async fn status(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Data(visuals(rt)?.status().await))
}
