//! Outbound notification sink — implements the alert pipeline's and the
//! pre-service scheduler's notifier traits over Telegram.
//!
//! Venues may carry their own bot credential; the relay default is used
//! otherwise. Bots are cached per token so a busy alert night doesn't
//! rebuild HTTP clients on every page.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use teloxide::prelude::*;
use tracing::warn;

use vigil_alerts::AlertNotifier;
use vigil_core::VenueId;
use vigil_roster::RosterStore;
use vigil_schedule::CheckNotifier;
use vigil_venues::VenueStore;

use crate::send;

pub struct TelegramNotifier {
    default_bot: Option<Bot>,
    admin_chat_id: Option<i64>,
    venues: Arc<VenueStore>,
    roster: Arc<RosterStore>,
    /// Per-venue bots keyed by their token.
    bots: DashMap<String, Bot>,
}

impl TelegramNotifier {
    pub fn new(
        default_bot_token: Option<&str>,
        admin_chat_id: Option<i64>,
        venues: Arc<VenueStore>,
        roster: Arc<RosterStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            default_bot: default_bot_token.map(Bot::new),
            admin_chat_id,
            venues,
            roster,
            bots: DashMap::new(),
        })
    }

    /// The bot to use for a venue: its own credential when set, else the
    /// relay default.
    fn bot_for(&self, venue_id: &VenueId) -> Option<Bot> {
        let venue_bot = self
            .venues
            .get(venue_id)
            .ok()
            .flatten()
            .and_then(|v| v.bot_token);
        match venue_bot {
            Some(token) => Some(
                self.bots
                    .entry(token.clone())
                    .or_insert_with(|| Bot::new(&token))
                    .clone(),
            ),
            None => self.default_bot.clone(),
        }
    }

    /// TD chats for a venue; falls back to the current on-call entry's chat
    /// when the roster has no chat ids at all.
    fn chats_for(&self, venue_id: &VenueId) -> Vec<i64> {
        let chats = self.roster.chat_ids(venue_id).unwrap_or_default();
        if !chats.is_empty() {
            return chats;
        }
        self.roster
            .current_on_call(venue_id)
            .ok()
            .flatten()
            .and_then(|e| e.telegram_chat_id)
            .into_iter()
            .collect()
    }

    async fn deliver(&self, venue_id: &VenueId, text: &str) {
        let Some(bot) = self.bot_for(venue_id) else {
            warn!(venue_id = %venue_id, "no bot credential configured, notification dropped");
            return;
        };
        let chats = self.chats_for(venue_id);
        if chats.is_empty() {
            warn!(venue_id = %venue_id, "no TD chats registered, notification dropped");
            return;
        }
        for chat in chats {
            send::send_text(&bot, ChatId(chat), text).await;
        }
    }
}

#[async_trait]
impl AlertNotifier for TelegramNotifier {
    async fn notify_venue(&self, venue_id: &VenueId, text: &str) {
        self.deliver(venue_id, text).await;
    }

    async fn notify_admin(&self, text: &str) {
        let (Some(bot), Some(chat)) = (self.default_bot.clone(), self.admin_chat_id) else {
            warn!("admin chat not configured, escalation copy dropped");
            return;
        };
        send::send_text(&bot, ChatId(chat), text).await;
    }
}

#[async_trait]
impl CheckNotifier for TelegramNotifier {
    async fn notify_tds(&self, venue_id: &VenueId, text: &str) {
        self.deliver(venue_id, text).await;
    }
}
