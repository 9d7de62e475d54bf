use std::sync::Arc;

use teloxide::Bot;
use tracing::info;

use chatrelay_config::{Config, ContactBook};
use chatrelay_telegram::{TelegramBot, TelegramMessenger};

use super::Relay;

/// Input for Telegram bot command.
pub struct TelegramInput {
    /// Optional bot token (overrides config)
    pub token: Option<String>,
    /// Optional allowed chat IDs (overrides config)
    pub allow_from: Option<Vec<String>>,
}

/// Strategy for running Telegram bot.
#[derive(Debug, Clone, Copy)]
pub struct TelegramStrategy;

impl super::CommandStrategy for TelegramStrategy {
    type Input = TelegramInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        if !config.telegram.enabled {
            anyhow::bail!("Telegram is not enabled in config. Set \"telegram.enabled\": true");
        }

        let token = if let Some(t) = input.token {
            t
        } else if !config.telegram.token.is_empty() {
            config.telegram.token.clone()
        } else {
            anyhow::bail!("Telegram bot token not configured. Set \"telegram.token\" in config");
        };

        let allow_from = input
            .allow_from
            .unwrap_or_else(|| config.telegram.allow_from.clone());

        info!("Starting Telegram bot...");
        let bot = Bot::new(token);

        // Chat ids are not phone numbers; only the bot's own allow-list applies.
        let contacts = Arc::new(ContactBook::from_contacts(Vec::new(), &[], false));
        let relay = Relay::start(
            &config,
            Arc::new(TelegramMessenger::new(bot.clone())),
            contacts,
        )?;

        let telegram = TelegramBot::new(bot, relay.orchestrator.clone(), &allow_from);
        info!("Telegram bot is running. Press Ctrl+C to stop.");
        let result = telegram.run().await;

        relay.shutdown().await;
        result?;
        Ok(())
    }
}
