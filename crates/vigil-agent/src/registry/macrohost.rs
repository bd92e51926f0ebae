use serde_json::{json, Value};
use vigil_drivers::DeviceDriver;

use super::{macrohost_dev, req_str, CommandReply, Registry};
use crate::error::Result;
use crate::runtime::AgentRuntime;

pub(super) fn register(r: &mut Registry) {
    r.add("macrohost.press", |rt, p| Box::pin(press(rt, p)));
    r.add("macrohost.pressButton", |rt, p| Box::pin(press_button(rt, p)));
    r.add("macrohost.status", |rt, p| Box::pin(status(rt, p)));
}

async fn press(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let name = req_str(params, "name")?;
    let matched = macrohost_dev(rt)?.press_by_name(name).await?;
    Ok(CommandReply::Text(format!("Pressed '{matched}'")))
}

async fn press_button(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let id = req_str(params, "id")?;
    macrohost_dev(rt)?.press(id).await?;
    Ok(CommandReply::Text(format!("Pressed button {id}")))
}

async fn status(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    let device = macrohost_dev(rt)?;
    Ok(CommandReply::Data(json!({
        "connected": device.connected(),
    })))
}
