use serde_json::{json, Value};

use super::{opt_u64, req_f64, req_str, req_u64, switcher, CommandReply, Registry};
use crate::error::Result;
use crate::runtime::AgentRuntime;

pub(super) fn register(r: &mut Registry) {
    r.add("switcher.cut", |rt, p| Box::pin(cut(rt, p)));
    r.add("switcher.auto", |rt, p| Box::pin(auto(rt, p)));
    r.add("switcher.setProgram", |rt, p| Box::pin(set_program(rt, p)));
    r.add("switcher.setPreview", |rt, p| Box::pin(set_preview(rt, p)));
    r.add("switcher.fadeToBlack", |rt, p| Box::pin(fade_to_black(rt, p)));
    r.add("switcher.startRecording", |rt, p| Box::pin(start_recording(rt, p)));
    r.add("switcher.stopRecording", |rt, p| Box::pin(stop_recording(rt, p)));
    r.add("switcher.relabelInput", |rt, p| Box::pin(relabel_input(rt, p)));
    r.add("switcher.runMacro", |rt, p| Box::pin(run_macro(rt, p)));
    r.add("switcher.setAux", |rt, p| Box::pin(set_aux(rt, p)));
    r.add("switcher.setKeyerOnAir", |rt, p| Box::pin(set_keyer(rt, p)));
    r.add("switcher.keyOn", |rt, p| Box::pin(key_on(rt, p)));
    r.add("switcher.keyOff", |rt, p| Box::pin(key_off(rt, p)));
    r.add("switcher.dskOn", |rt, p| Box::pin(dsk_on(rt, p)));
    r.add("switcher.dskOff", |rt, p| Box::pin(dsk_off(rt, p)));
    r.add("switcher.setSuperSourceBox", |rt, p| Box::pin(set_supersource(rt, p)));
    r.add("switcher.setColor", |rt, p| Box::pin(set_color(rt, p)));
    r.add("switcher.ptz", |rt, p| Box::pin(ptz(rt, p)));
    r.add("switcher.status", |rt, p| Box::pin(status(rt, p)));
}

async fn cut(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let me = opt_u64(params, "me", 0) as u8;
    switcher(rt)?.cut(me).await?;
    Ok(CommandReply::Text("Cut executed".into()))
}

async fn auto(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let me = opt_u64(params, "me", 0) as u8;
    let rate = opt_u64(params, "rate", 30) as u16;
    switcher(rt)?.auto(me, rate).await?;
    Ok(CommandReply::Text("Auto transition started".into()))
}

async fn set_program(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let input = req_u64(params, "input")? as u16;
    let me = opt_u64(params, "me", 0) as u8;
    switcher(rt)?.set_program(me, input).await?;
    Ok(CommandReply::Text(format!("Program set to input {input}")))
}

async fn set_preview(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let input = req_u64(params, "input")? as u16;
    let me = opt_u64(params, "me", 0) as u8;
    switcher(rt)?.set_preview(me, input).await?;
    Ok(CommandReply::Text(format!("Preview set to input {input}")))
}

async fn fade_to_black(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let me = opt_u64(params, "me", 0) as u8;
    switcher(rt)?.fade_to_black(me).await?;
    Ok(CommandReply::Text("Fade to black toggled".into()))
}

async fn start_recording(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    switcher(rt)?.set_recording(true).await?;
    Ok(CommandReply::Text("Switcher recording started".into()))
}

async fn stop_recording(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    switcher(rt)?.set_recording(false).await?;
    Ok(CommandReply::Text("Switcher recording stopped".into()))
}

async fn relabel_input(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let input = req_u64(params, "input")? as u16;
    let name = req_str(params, "name")?;
    switcher(rt)?.relabel_input(input, name).await?;
    Ok(CommandReply::Text(format!("Input {input} relabelled to '{name}'")))
}

async fn run_macro(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let index = req_u64(params, "index")? as u16;
    switcher(rt)?.run_macro(index).await?;
    Ok(CommandReply::Text(format!("Macro {index} running")))
}

async fn set_aux(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let aux = req_u64(params, "aux")? as u8;
    let source = req_u64(params, "source")? as u16;
    switcher(rt)?.set_aux(aux, source).await?;
    Ok(CommandReply::Text(format!("Aux {aux} routed to source {source}")))
}

async fn set_keyer(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let keyer = req_u64(params, "keyer")? as u8;
    let on = super::req_bool(params, "on")?;
    let upstream = params["upstream"].as_bool().unwrap_or(true);
    let me = opt_u64(params, "me", 0) as u8;
    switcher(rt)?.set_keyer_on_air(me, keyer, upstream, on).await?;
    Ok(CommandReply::Text(format!(
        "{} key {keyer} {}",
        if upstream { "Upstream" } else { "Downstream" },
        if on { "on air" } else { "off air" }
    )))
}

async fn key_on(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    keyer_shortcut(rt, params, true, true).await
}

async fn key_off(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    keyer_shortcut(rt, params, true, false).await
}

async fn dsk_on(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    keyer_shortcut(rt, params, false, true).await
}

async fn dsk_off(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    keyer_shortcut(rt, params, false, false).await
}

async fn keyer_shortcut(
    rt: &AgentRuntime,
    params: &Value,
    upstream: bool,
    on: bool,
) -> Result<CommandReply> {
    let keyer = opt_u64(params, "keyer", 1) as u8;
    let me = opt_u64(params, "me", 0) as u8;
    switcher(rt)?.set_keyer_on_air(me, keyer, upstream, on).await?;
    Ok(CommandReply::Text(format!(
        "{} {keyer} {}",
        if upstream { "Key" } else { "DSK" },
        if on { "on" } else { "off" }
    )))
}

async fn set_supersource(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let box_index = req_u64(params, "box")? as u8;
    let x = req_f64(params, "x")?;
    let y = req_f64(params, "y")?;
    let size = super::opt_f64(params, "size", 0.5);
    let enabled = params["enabled"].as_bool().unwrap_or(true);
    switcher(rt)?
        .set_supersource_box(box_index, x, y, size, enabled)
        .await?;
    Ok(CommandReply::Text(format!("SuperSource box {box_index} updated")))
}

async fn set_color(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let generator = opt_u64(params, "generator", 0) as u8;
    let hue = req_u64(params, "hue")? as u16;
    let sat = opt_u64(params, "sat", 1000) as u16;
    let luma = opt_u64(params, "luma", 500) as u16;
    switcher(rt)?.set_color(generator, hue, sat, luma).await?;
    Ok(CommandReply::Text(format!("Color generator {generator} set")))
}

async fn ptz(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let camera = req_u64(params, "camera")? as u8;
    let pan = super::opt_f64(params, "pan", 0.0);
    let tilt = super::opt_f64(params, "tilt", 0.0);
    let zoom = super::opt_f64(params, "zoom", 0.0);
    switcher(rt)?.ptz(camera, pan, tilt, zoom).await?;
    Ok(CommandReply::Text(format!("Camera {camera} moving")))
}

async fn status(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    let status = switcher(rt)?.status();
    Ok(CommandReply::Data(json!(status)))
}
