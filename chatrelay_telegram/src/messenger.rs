use async_trait::async_trait;
use teloxide::payloads::SendPhotoSetters;
use teloxide::prelude::*;
use teloxide::types::InputFile;

use chatrelay_core::OutboundMessenger;

/// Delivers replies and generated images to Telegram chats. The recipient is
/// the numeric chat id.
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

pub(crate) fn chat_id(recipient: &str) -> anyhow::Result<ChatId> {
    recipient
        .trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|e| anyhow::anyhow!("Invalid Telegram chat id {recipient:?}: {e}"))
}

#[async_trait]
impl OutboundMessenger for TelegramMessenger {
    async fn send(
        &self,
        text: Option<&str>,
        recipient: &str,
        media_url: Option<&str>,
    ) -> anyhow::Result<String> {
        let chat = chat_id(recipient)?;

        let message = match (media_url, text) {
            (Some(url), caption) => {
                let url = reqwest::Url::parse(url)?;
                let mut request = self.bot.send_photo(chat, InputFile::url(url));
                if let Some(caption) = caption.filter(|c| !c.is_empty()) {
                    request = request.caption(caption);
                }
                request.await?
            }
            (None, Some(text)) => self.bot.send_message(chat, text).await?,
            (None, None) => anyhow::bail!("Nothing to send to chat {recipient}"),
        };
        Ok(message.id.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_must_be_a_chat_id() {
        assert_eq!(chat_id("-100123").unwrap(), ChatId(-100_123));
        assert!(chat_id("+15550001x").is_err());
    }
}
