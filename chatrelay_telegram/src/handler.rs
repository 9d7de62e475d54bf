use teloxide::prelude::*;
use teloxide::types::{ChatAction, Message};
use tracing::{error, info, warn};

use chatrelay_core::{InboundMessage, Media};

use crate::{Command, Error, Result, TelegramBot};

/// Reply used when the orchestrator fails.
pub const APOLOGY: &str = "Sorry, something went wrong. Please try again later.";

const VOICE_CONTENT_TYPE: &str = "audio/ogg";

/// Handle bot commands
pub async fn handle_command(relay: TelegramBot, msg: Message, cmd: Command) -> Result<()> {
    let chat_id = msg.chat.id.0;
    let username = username(&msg);

    match cmd {
        Command::Start => {
            info!("[@{username}] Command: /start");
            relay
                .bot
                .send_message(msg.chat.id, Command::welcome_text())
                .await?;
        }
        Command::Reset => {
            info!("[@{username}] Command: /reset");
            relay.reset_session(chat_id).await;
            relay
                .bot
                .send_message(msg.chat.id, "Conversation reset.")
                .await?;
        }
        Command::Help => {
            info!("[@{username}] Command: /help");
            relay
                .bot
                .send_message(msg.chat.id, Command::help_text())
                .await?;
        }
    }

    Ok(())
}

fn username(msg: &Message) -> &str {
    msg.from
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .unwrap_or("unknown")
}

/// Canonical inbound record for a text or voice message.
async fn inbound_from(relay: &TelegramBot, msg: &Message) -> Result<InboundMessage> {
    let sender_id = msg.chat.id.0.to_string();
    let mut inbound = if let Some(text) = msg.text() {
        InboundMessage::text(sender_id, text)
    } else if let Some(voice) = msg.voice() {
        let file = relay.bot.get_file(voice.file.id.clone()).await?;
        let content_type = voice
            .mime_type
            .as_ref()
            .map_or_else(|| VOICE_CONTENT_TYPE.to_string(), ToString::to_string);
        InboundMessage::text(sender_id, "").with_media(Media {
            url: relay.file_url(&file.path),
            content_type,
        })
    } else {
        return Err(Error::Unsupported("only text and voice messages are handled"));
    };
    inbound.sender_name = msg.from.as_ref().map(|u| u.first_name.clone());
    Ok(inbound)
}

/// Handle any message (commands, text or voice)
pub async fn handle_message(relay: TelegramBot, msg: Message) -> Result<()> {
    let chat_id = msg.chat.id.0;
    let username = username(&msg).to_string();

    if !relay.is_allowed(chat_id) {
        warn!("[@{username}] Ignoring chat {chat_id}, not in allow_from");
        return Ok(());
    }

    if let Some(cmd) = msg.text().and_then(Command::parse_from_text) {
        return handle_command(relay, msg, cmd).await;
    }

    let inbound = match inbound_from(&relay, &msg).await {
        Ok(inbound) => inbound,
        Err(Error::Unsupported(reason)) => {
            warn!("[@{username}] Skipping message: {reason}");
            let reply = relay.orchestrator().replies().not_understood.clone();
            relay.bot.send_message(msg.chat.id, reply).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    info!("[@{username}] Message from {}", inbound.display_name());
    relay
        .bot
        .send_chat_action(msg.chat.id, ChatAction::Typing)
        .await?;

    let reply = match relay.process_message(chat_id, &inbound).await {
        Ok(outcome) => {
            info!("[@{username}] {:?} turn", outcome.kind);
            outcome.reply
        }
        Err(Error::Unauthorized(id)) => {
            warn!("[@{username}] Rejected message from chat {id}");
            return Ok(());
        }
        Err(e) => {
            error!("[@{username}] Conversation failed: {e}");
            APOLOGY.to_string()
        }
    };

    if !reply.trim().is_empty() {
        relay.bot.send_message(msg.chat.id, reply).await?;
    }
    Ok(())
}
