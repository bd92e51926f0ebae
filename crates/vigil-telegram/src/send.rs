//! Plain-text sending with Telegram's 4096-char limit respected.
//!
//! Alert and status messages are short; the splitter only earns its keep
//! when a structured command reply (a full composition dump, say) comes
//! back through chat. Splits prefer line boundaries.

use teloxide::prelude::*;
use tracing::warn;

const CHUNK_MAX: usize = 4090;

/// Split on line boundaries under the limit; force-split pathological
/// single lines.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split('\n') {
        let cost = if current.is_empty() { line.len() } else { 1 + line.len() };
        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        // A single line longer than the limit gets hard-wrapped.
        let mut rest = line;
        while rest.len() > CHUNK_MAX {
            let (head, tail) = rest.split_at(CHUNK_MAX);
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(head.to_string());
            rest = tail;
        }
        current.push_str(rest);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub async fn send_text(bot: &Bot, chat_id: ChatId, text: &str) {
    for chunk in split_chunks(text) {
        if let Err(e) = bot.send_message(chat_id, chunk).await {
            warn!(chat_id = chat_id.0, error = %e, "telegram send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_chunks("hello"), vec!["hello".to_string()]);
    }

    #[test]
    fn splits_on_line_boundaries() {
        let line = "x".repeat(2000);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }

    #[test]
    fn pathological_single_line_is_hard_wrapped() {
        let text = "y".repeat(10_000);
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 10_000);
    }
}
