use serde_json::{json, Value};

use super::{req_str, req_u64, router, CommandReply, Registry};
use crate::error::{AgentError, Result};
use crate::runtime::AgentRuntime;

pub(super) fn register(r: &mut Registry) {
    r.add("router.route", |rt, p| Box::pin(route(rt, p)));
    r.add("router.routeByLabel", |rt, p| Box::pin(route_by_label(rt, p)));
    r.add("router.setInputLabel", |rt, p| Box::pin(set_input_label(rt, p)));
    r.add("router.setOutputLabel", |rt, p| Box::pin(set_output_label(rt, p)));
    r.add("router.inputLabels", |rt, p| Box::pin(input_labels(rt, p)));
    r.add("router.outputLabels", |rt, p| Box::pin(output_labels(rt, p)));
    r.add("router.routing", |rt, p| Box::pin(routing(rt, p)));
    r.add("router.status", |rt, p| Box::pin(status(rt, p)));
}

async fn route(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let output = req_u64(params, "output")? as u32;
    let input = req_u64(params, "input")? as u32;
    router(rt, params)?.route(output, input).await?;
    Ok(CommandReply::Text(format!("Routed input {input} to output {output}")))
}

/// Route by label substrings — the chat-friendly form. Both labels are
/// matched case-insensitively against the rehydrated tables.
async fn route_by_label(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let input_name = req_str(params, "input")?.to_lowercase();
    let output_name = req_str(params, "output")?.to_lowercase();
    let device = router(rt, params)?;

    let input = device
        .input_labels()
        .into_iter()
        .find(|(_, label)| label.to_lowercase().contains(&input_name))
        .map(|(idx, _)| idx)
        .ok_or(AgentError::InvalidParams { field: "input" })?;
    let output = device
        .output_labels()
        .into_iter()
        .find(|(_, label)| label.to_lowercase().contains(&output_name))
        .map(|(idx, _)| idx)
        .ok_or(AgentError::InvalidParams { field: "output" })?;

    device.route(output, input).await?;
    Ok(CommandReply::Text(format!("Routed input {input} to output {output}")))
}

async fn set_input_label(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let input = req_u64(params, "input")? as u32;
    let label = req_str(params, "label")?;
    router(rt, params)?.set_input_label(input, label).await?;
    Ok(CommandReply::Text(format!("Input {input} labelled '{label}'")))
}

async fn set_output_label(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let output = req_u64(params, "output")? as u32;
    let label = req_str(params, "label")?;
    router(rt, params)?.set_output_label(output, label).await?;
    Ok(CommandReply::Text(format!("Output {output} labelled '{label}'")))
}

async fn input_labels(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let device = router(rt, params)?;
    let labels = device.input_labels();
    if labels.is_empty() {
        // Mirror not hydrated yet (fresh connect) — ask the device directly.
        let body = device.query("INPUT LABELS:").await?;
        return Ok(CommandReply::Data(json!(body)));
    }
    Ok(CommandReply::Data(json!(labels)))
}

async fn output_labels(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let device = router(rt, params)?;
    let labels = device.output_labels();
    if labels.is_empty() {
        let body = device.query("OUTPUT LABELS:").await?;
        return Ok(CommandReply::Data(json!(body)));
    }
    Ok(CommandReply::Data(json!(labels)))
}

async fn routing(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Data(json!(router(rt, params)?.routing())))
}

async fn status(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Data(json!(router(rt, params)?.status())))
}
