use serde_json::{json, Value};

use super::{mixer, req_f64, req_u64, CommandReply, Registry};
use crate::error::Result;
use crate::runtime::AgentRuntime;

pub(super) fn register(r: &mut Registry) {
    r.add("mixer.muteChannel", |rt, p| Box::pin(mute_channel(rt, p)));
    r.add("mixer.unmuteChannel", |rt, p| Box::pin(unmute_channel(rt, p)));
    r.add("mixer.setFader", |rt, p| Box::pin(set_fader(rt, p)));
    r.add("mixer.muteMain", |rt, p| Box::pin(mute_main(rt, p)));
    r.add("mixer.unmuteMain", |rt, p| Box::pin(unmute_main(rt, p)));
    r.add("mixer.setMainFader", |rt, p| Box::pin(set_main_fader(rt, p)));
    r.add("mixer.status", |rt, p| Box::pin(status(rt, p)));
}

async fn mute_channel(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let channel = req_u64(params, "channel")? as u16;
    mixer(rt)?.mute_channel(channel, true).await?;
    Ok(CommandReply::Text(format!("Channel {channel} muted")))
}

async fn unmute_channel(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let channel = req_u64(params, "channel")? as u16;
    mixer(rt)?.mute_channel(channel, false).await?;
    Ok(CommandReply::Text(format!("Channel {channel} unmuted")))
}

async fn set_fader(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let channel = req_u64(params, "channel")? as u16;
    let level = req_f64(params, "level")?;
    mixer(rt)?.set_channel_fader(channel, level).await?;
    Ok(CommandReply::Text(format!(
        "Fader {channel} set to {:.0}%",
        level.clamp(0.0, 1.0) * 100.0
    )))
}

async fn mute_main(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    mixer(rt)?.set_main_mute(true).await?;
    Ok(CommandReply::Text("Main bus muted".into()))
}

async fn unmute_main(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    mixer(rt)?.set_main_mute(false).await?;
    Ok(CommandReply::Text("Main bus unmuted".into()))
}

async fn set_main_fader(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let level = req_f64(params, "level")?;
    mixer(rt)?.set_main_fader(level).await?;
    Ok(CommandReply::Text(format!(
        "Main fader set to {:.0}%",
        level.clamp(0.0, 1.0) * 100.0
    )))
}

async fn status(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Data(json!(mixer(rt)?.status())))
}
