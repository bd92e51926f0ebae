use serde_json::{json, Value};

use super::{req_u64, slides, CommandReply, Registry};
use crate::error::Result;
use crate::runtime::AgentRuntime;

pub(super) fn register(r: &mut Registry) {
    r.add("slides.next", |rt, p| Box::pin(next(rt, p)));
    r.add("slides.previous", |rt, p| Box::pin(previous(rt, p)));
    r.add("slides.goto", |rt, p| Box::pin(goto(rt, p)));
    r.add("slides.current", |rt, p| Box::pin(current(rt, p)));
    r.add("slides.status", |rt, p| Box::pin(status(rt, p)));
}

async fn next(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    slides(rt)?.next_slide().await?;
    Ok(CommandReply::Text("Next slide".into()))
}

async fn previous(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    slides(rt)?.previous_slide().await?;
    Ok(CommandReply::Text("Previous slide".into()))
}

async fn goto(rt: &AgentRuntime, params: &Value) -> Result<CommandReply> {
    let index = req_u64(params, "index")? as u32;
    slides(rt)?.trigger_index(index).await?;
    Ok(CommandReply::Text(format!("Jumped to slide {index}")))
}

async fn current(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    let status = slides(rt)?.status();
    Ok(CommandReply::Text(match status.current_presentation {
        Some(name) => format!(
            "'{name}' — slide {} of {}",
            status.slide_index, status.slide_total
        ),
        None => "No presentation running".into(),
    }))
}

async fn status(rt: &AgentRuntime, _params: &Value) -> Result<CommandReply> {
    Ok(CommandReply::Data(json!(slides(rt)?.status())))
}
