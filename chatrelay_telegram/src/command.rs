use teloxide::types::BotCommand;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Reset,
    Help,
}

impl Command {
    fn all() -> Vec<BotCommand> {
        vec![
            BotCommand {
                command: "start".to_string(),
                description: "Start talking to the bot".to_string(),
            },
            BotCommand {
                command: "reset".to_string(),
                description: "Forget the current conversation".to_string(),
            },
            BotCommand {
                command: "help".to_string(),
                description: "Show available commands".to_string(),
            },
        ]
    }

    #[must_use]
    pub fn bot_commands() -> Vec<BotCommand> {
        Self::all()
    }

    /// Recognizes `/start`, `/reset` and `/help`, with or without a
    /// `@bot_name` suffix.
    #[must_use]
    pub fn parse_from_text(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();
        let text = text.split('@').next().unwrap_or(&text);

        match text {
            "/start" => Some(Self::Start),
            "/reset" => Some(Self::Reset),
            "/help" => Some(Self::Help),
            _ => None,
        }
    }

    #[must_use]
    pub const fn help_text() -> &'static str {
        r#"
ChatRelay Telegram Bot

Commands:
/start - Start talking to the bot
/reset - Forget the current conversation
/help  - Show this help

You can also type:
"set temperature to 0.7" to tune a completion parameter
"switch to <model>" to change the model
"goodbye" to end the conversation

Voice notes are transcribed when transcription is enabled.
"#
    }

    #[must_use]
    pub const fn welcome_text() -> &'static str {
        r"
Hi! I'm a conversational assistant.

Just send a message to start chatting. Ask me for a picture and I'll try to draw one.

Send /help to see the command list.
"
    }
}
