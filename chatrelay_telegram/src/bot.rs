use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tokio::time::sleep;
use tracing::{info, warn};

use chatrelay_conversation::{Orchestrator, TurnOutcome};
use chatrelay_core::InboundMessage;

use crate::{Error, Result};

/// Telegram front end for the conversation orchestrator.
#[derive(Clone)]
pub struct TelegramBot {
    pub bot: Bot,
    orchestrator: Arc<Orchestrator>,
    allowed_chats: Arc<Vec<i64>>,
}

impl TelegramBot {
    /// Chat ids in `allow_from` that do not parse as integers are ignored.
    pub fn new(bot: Bot, orchestrator: Arc<Orchestrator>, allow_from: &[String]) -> Self {
        let allowed_chats = allow_from
            .iter()
            .filter_map(|s| {
                let id = s.trim().parse::<i64>();
                if id.is_err() {
                    warn!("Ignoring invalid Telegram chat id in allow_from: {s}");
                }
                id.ok()
            })
            .collect();

        Self {
            bot,
            orchestrator,
            allowed_chats: Arc::new(allowed_chats),
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub fn is_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }

    /// Forget the chat's conversation and cancel its expiry timer.
    pub async fn reset_session(&self, chat_id: i64) -> bool {
        self.orchestrator.reset(&chat_id.to_string()).await
    }

    /// Run one inbound message through the orchestrator.
    pub async fn process_message(&self, chat_id: i64, inbound: &InboundMessage) -> Result<TurnOutcome> {
        if !self.is_allowed(chat_id) {
            return Err(Error::Unauthorized(chat_id));
        }
        Ok(self.orchestrator.handle(inbound).await?)
    }

    /// Public URL of an uploaded file.
    pub(crate) fn file_url(&self, path: &str) -> String {
        format!("https://api.telegram.org/file/bot{}/{path}", self.bot.token())
    }

    /// Wait until the Telegram API answers, backing off 2s, 4s, ... up to 10s.
    async fn test_connection(&self) {
        const INITIAL_DELAY_SECS: u64 = 2;
        const MAX_DELAY_SECS: u64 = 10;

        let mut attempt = 1u64;
        loop {
            match self.bot.get_me().await {
                Ok(me) => {
                    info!(
                        "Connected to Telegram API: @{} (id: {})",
                        me.user.username.as_deref().unwrap_or("no username"),
                        me.user.id
                    );
                    return;
                }
                Err(e) => {
                    let delay_secs = (INITIAL_DELAY_SECS * attempt).min(MAX_DELAY_SECS);
                    warn!("Connection attempt {attempt} failed: {e}. Retrying in {delay_secs}s...");
                    if attempt == 1 {
                        warn!("Check the bot token and that api.telegram.org is reachable");
                    }
                    sleep(Duration::from_secs(delay_secs)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Dispatch updates until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
        use teloxide::dptree;
        use teloxide::types::Update;

        self.test_connection().await;

        if let Err(e) = self.bot.set_my_commands(crate::Command::bot_commands()).await {
            warn!("Could not register bot commands: {e}");
        }

        let bot = self.bot.clone();
        let schema = dptree::entry().branch(Update::filter_message().endpoint({
            let relay = self.clone();
            move |_bot: Bot, msg: teloxide::types::Message| {
                let relay = relay.clone();
                async move { crate::handler::handle_message(relay, msg).await }
            }
        }));

        Dispatcher::builder(bot, schema)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Telegram dispatcher stopped");
        Ok(())
    }
}
