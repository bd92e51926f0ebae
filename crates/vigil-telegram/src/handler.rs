//! Telegram message handler registered in the teloxide Dispatcher.
//!
//! Runs for every incoming `Message`:
//! 1. bot-message filter,
//! 2. slash command interception (`/register`, `/ack_…`, `/swap`,
//!    `/confirmswap`, `/oncall`, `/status`, `/help`),
//! 3. venue resolution (roster row, else claimed guest token),
//! 4. free text through the NL parser → command dispatch → reply.
//!
//! Unparseable text gets a gentle nudge, never silence — a TD mid-service
//! must know the bot heard them.

use std::sync::Arc;

use serde_json::Value;
use teloxide::prelude::*;
use tracing::warn;

use vigil_core::VenueId;
use vigil_roster::swap::SwapParty;

use crate::context::TelegramAppContext;
use crate::send;

pub async fn handle_message<C: TelegramAppContext + 'static>(
    bot: Bot,
    msg: Message,
    ctx: Arc<C>,
) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = from.id.0.to_string();
    let user_name = from.full_name();
    let chat_id = msg.chat.id;
    let text = msg.text().unwrap_or("").trim().to_string();
    if text.is_empty() {
        return Ok(());
    }

    let reply = if let Some(rest) = text.strip_prefix("/register") {
        register(ctx.as_ref(), rest.trim(), &user_id, &user_name, chat_id.0)
    } else if let Some(short) = text.strip_prefix("/ack_") {
        match ctx.acknowledge_alert(short.trim(), &user_name) {
            Some(confirmation) => confirmation,
            None => "No open alert matches that token.".to_string(),
        }
    } else if let Some(target) = text.strip_prefix("/swap") {
        swap(ctx.as_ref(), target.trim(), &user_id, &user_name, chat_id.0, &bot).await
    } else if text.starts_with("/confirmswap") {
        confirm_swap(ctx.as_ref(), chat_id.0, &bot).await
    } else if let Some(rest) = text.strip_prefix("/oncall") {
        on_call(ctx.as_ref(), rest.trim(), &user_id, chat_id.0)
    } else if let Some(rest) = text.strip_prefix("/primary") {
        set_primary(ctx.as_ref(), rest.trim(), &user_id, chat_id.0)
    } else if text.starts_with("/status") {
        status(ctx.as_ref(), &user_id, chat_id.0).await
    } else if text.starts_with("/help") || text.starts_with("/start") {
        help_text()
    } else if text.starts_with('/') {
        "Unknown command — try /help.".to_string()
    } else {
        free_text(ctx.as_ref(), &text, &user_id, chat_id.0).await
    };

    send::send_text(&bot, chat_id, &reply).await;
    Ok(())
}

/// Resolve which venue this sender speaks for: roster first, then a
/// claimed guest token.
fn venue_for(ctx: &dyn TelegramAppContext, user_id: &str, chat_id: i64) -> Option<VenueId> {
    match ctx.roster().venues_for_user(user_id) {
        Ok(venues) if !venues.is_empty() => return venues.into_iter().next(),
        Ok(_) => {}
        Err(e) => warn!("roster lookup failed: {e}"),
    }
    ctx.roster()
        .guest_for_chat(chat_id)
        .ok()
        .flatten()
        .map(|g| g.venue_id)
}

fn register(
    ctx: &dyn TelegramAppContext,
    code: &str,
    user_id: &str,
    user_name: &str,
    chat_id: i64,
) -> String {
    if code.is_empty() {
        return "Usage: /register CODE (from your venue admin)".to_string();
    }

    if let Some(suffix) = code
        .to_uppercase()
        .strip_prefix("GUEST-")
        .map(|s| s.to_lowercase())
    {
        // Tokens are stored as `GUEST-` + lowercase hex; chat clients love
        // to title-case them.
        let token = format!("GUEST-{suffix}");
        return match ctx.roster().claim_guest(&token, chat_id) {
            Ok(guest) => format!(
                "Welcome, {}! You have guest access until {}.",
                guest.display_name, guest.expires_at
            ),
            Err(e) => format!("Could not claim that guest pass: {e}"),
        };
    }

    match ctx.venues().get_by_code(code) {
        Ok(Some(venue)) => {
            match ctx
                .roster()
                .register_member(&venue.id, user_id, user_name, Some(chat_id), None)
            {
                Ok(_) => format!(
                    "Registered! You'll receive alerts for {} and can send it commands here.",
                    venue.name
                ),
                Err(e) => format!("Registration failed: {e}"),
            }
        }
        Ok(None) => "That code doesn't match any venue. Double-check with your admin.".to_string(),
        Err(e) => {
            warn!("venue lookup failed: {e}");
            "Something went wrong — try again in a minute.".to_string()
        }
    }
}

async fn swap(
    ctx: &dyn TelegramAppContext,
    target_name: &str,
    user_id: &str,
    user_name: &str,
    chat_id: i64,
    bot: &Bot,
) -> String {
    if target_name.is_empty() {
        return "Usage: /swap Name — ask a teammate to take your on-call week.".to_string();
    }
    let Some(venue_id) = venue_for(ctx, user_id, chat_id) else {
        return "You're not registered with a venue yet. Use /register CODE first.".to_string();
    };

    let requester = SwapParty {
        chat_id,
        name: user_name.to_string(),
    };
    match ctx.swaps().request(ctx.roster(), &venue_id, requester, target_name) {
        Ok(request) => {
            let prompt = format!(
                "{} asked you to take this week's on-call shift. Reply /confirmswap to accept. \
                 This request expires in 24 hours.",
                request.requester.name
            );
            send::send_text(bot, ChatId(request.target.chat_id), &prompt).await;
            format!("Asked {} — you'll both be notified when they confirm.", request.target.name)
        }
        Err(e) => format!("Couldn't set up the swap: {e}"),
    }
}

async fn confirm_swap(ctx: &dyn TelegramAppContext, chat_id: i64, bot: &Bot) -> String {
    match ctx.swaps().confirm(ctx.roster(), chat_id) {
        Ok(Some((request, entry))) => {
            let note = format!(
                "{} confirmed — they're on call for week {}.",
                entry.td_name, request.week_key
            );
            send::send_text(bot, ChatId(request.requester.chat_id), &note).await;
            format!("You're on call for week {}. Thanks for covering!", request.week_key)
        }
        Ok(None) => "No pending swap request is waiting on you.".to_string(),
        Err(e) => format!("Swap confirmation failed: {e}"),
    }
}

/// `/oncall` reports, `/oncall Name` assigns the current week (fuzzy name).
fn on_call(ctx: &dyn TelegramAppContext, name: &str, user_id: &str, chat_id: i64) -> String {
    let Some(venue_id) = venue_for(ctx, user_id, chat_id) else {
        return "You're not registered with a venue yet. Use /register CODE first.".to_string();
    };
    if !name.is_empty() {
        return match ctx.roster().set_on_call(&venue_id, name) {
            Ok(entry) => format!(
                "{} is now on call for week {}.",
                entry.td_name, entry.week_of_iso_week
            ),
            Err(e) => format!("Couldn't assign on-call: {e}"),
        };
    }
    match ctx.roster().current_on_call(&venue_id) {
        Ok(Some(entry)) => {
            if entry.week_of_iso_week.is_empty() {
                format!("{} is covering (no explicit week assignment).", entry.td_name)
            } else {
                format!("{} is on call for week {}.", entry.td_name, entry.week_of_iso_week)
            }
        }
        Ok(None) => "Nobody is registered for this venue yet.".to_string(),
        Err(e) => format!("Lookup failed: {e}"),
    }
}

/// `/primary Name` — the fallback answerer when no week is assigned.
fn set_primary(ctx: &dyn TelegramAppContext, name: &str, user_id: &str, chat_id: i64) -> String {
    if name.is_empty() {
        return "Usage: /primary Name".to_string();
    }
    let Some(venue_id) = venue_for(ctx, user_id, chat_id) else {
        return "You're not registered with a venue yet. Use /register CODE first.".to_string();
    };
    let member = match ctx.roster().find_member(&venue_id, name) {
        Ok(Some(m)) => m,
        Ok(None) => return format!("No roster member matching '{name}'."),
        Err(e) => return format!("Lookup failed: {e}"),
    };
    match ctx.roster().set_primary(&venue_id, &member.telegram_user_id) {
        Ok(()) => format!("{} is now the primary contact.", member.name),
        Err(e) => format!("Couldn't set primary: {e}"),
    }
}

async fn status(ctx: &dyn TelegramAppContext, user_id: &str, chat_id: i64) -> String {
    let Some(venue_id) = venue_for(ctx, user_id, chat_id) else {
        return "You're not registered with a venue yet. Use /register CODE first.".to_string();
    };
    match ctx
        .dispatch_command(&venue_id, "system.status", Value::Null)
        .await
    {
        Ok(snapshot) => summarise_status(&snapshot),
        Err(e) => format!("Couldn't reach the venue agent: {e}"),
    }
}

async fn free_text(
    ctx: &dyn TelegramAppContext,
    text: &str,
    user_id: &str,
    chat_id: i64,
) -> String {
    let Some(parsed) = ctx.parser().parse(text) else {
        return "I didn't catch that. Try something like \"camera 2\", \"mute channel 4\", \
                or /help for the full list."
            .to_string();
    };
    let Some(venue_id) = venue_for(ctx, user_id, chat_id) else {
        return "You're not registered with a venue yet. Use /register CODE first.".to_string();
    };

    match ctx
        .dispatch_command(&venue_id, parsed.command, parsed.params)
        .await
    {
        Ok(Value::String(summary)) => summary,
        Ok(Value::Null) => "Done.".to_string(),
        Ok(other) => serde_json::to_string_pretty(&other).unwrap_or_else(|_| "Done.".to_string()),
        Err(e) => format!("That didn't work: {e}"),
    }
}

/// Boil a full telemetry snapshot down to a few chat lines.
fn summarise_status(snapshot: &Value) -> String {
    let mut lines = vec!["Venue status:".to_string()];
    if let Some(streamer) = snapshot.get("streamer") {
        let streaming = streamer["streaming"].as_bool().unwrap_or(false);
        if streaming {
            lines.push(format!(
                "🔴 Live — {:.0} kbps, {:.1} fps",
                streamer["bitrate"].as_f64().unwrap_or(0.0),
                streamer["fps"].as_f64().unwrap_or(0.0),
            ));
        } else {
            lines.push("⚫ Not streaming".to_string());
        }
    }
    if let Some(switcher) = snapshot.get("switcher") {
        lines.push(format!(
            "Switcher: {} (program {})",
            connected_word(switcher),
            switcher["programInput"].as_u64().unwrap_or(0)
        ));
    }
    if let Some(mixer) = snapshot.get("mixer") {
        let muted = mixer["mainMuted"].as_bool().unwrap_or(false);
        lines.push(format!(
            "Mixer: {}{}",
            connected_word(mixer),
            if muted { " — MAIN MUTED" } else { "" }
        ));
    }
    if let Some(slides) = snapshot.get("slides") {
        lines.push(format!("Slides: {}", connected_word(slides)));
    }
    lines.join("\n")
}

fn connected_word(section: &Value) -> &'static str {
    if section["connected"].as_bool().unwrap_or(false) {
        "connected"
    } else {
        "offline"
    }
}

fn help_text() -> String {
    "Commands:\n\
     /register CODE — join your venue's roster\n\
     /status — live venue overview\n\
     /oncall — who's covering this week (/oncall Name assigns)\n\
     /primary Name — set the fallback contact\n\
     /swap Name — ask someone to take your week\n\
     /confirmswap — accept a pending swap\n\
     /ack_XXXXXXXX — acknowledge an alert\n\
     \n\
     Or just type: \"camera 2\", \"cut\", \"mute channel 4\", \
     \"next slide\", \"route 3 to 1\", \"start stream\"…"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_summary_reads_camel_case_snapshot() {
        let snapshot = json!({
            "streamer": { "connected": true, "streaming": true, "bitrate": 4500.0, "fps": 29.97 },
            "switcher": { "connected": true, "programInput": 3 },
            "mixer": { "connected": true, "mainMuted": true },
        });
        let text = summarise_status(&snapshot);
        assert!(text.contains("🔴 Live — 4500 kbps, 30.0 fps"));
        assert!(text.contains("program 3"));
        assert!(text.contains("MAIN MUTED"));
    }

    #[test]
    fn status_summary_handles_offline_everything() {
        let snapshot = json!({
            "streamer": { "connected": false, "streaming": false },
            "switcher": { "connected": false },
        });
        let text = summarise_status(&snapshot);
        assert!(text.contains("⚫ Not streaming"));
        assert!(text.contains("Switcher: offline"));
    }
}
