//! Telegram adapter — wraps a teloxide `Bot` + `Dispatcher` and drives the
//! long-polling loop for the lifetime of the process. No public URL needed.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::info;

use crate::context::TelegramAppContext;
use crate::handler::handle_message;

pub struct TelegramAdapter<C: TelegramAppContext + 'static> {
    ctx: Arc<C>,
    bot_token: String,
}

impl<C: TelegramAppContext + 'static> TelegramAdapter<C> {
    pub fn new(bot_token: &str, ctx: Arc<C>) -> Self {
        Self {
            ctx,
            bot_token: bot_token.to_string(),
        }
    }

    /// Connect and dispatch until the process exits. Teloxide's dispatcher
    /// reconnects on transport errors on its own.
    pub async fn run(self) {
        let bot = Bot::new(&self.bot_token);
        info!("telegram: starting long-polling dispatcher");

        let handler = Update::filter_message().endpoint(handle_message::<C>);

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![self.ctx])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}
