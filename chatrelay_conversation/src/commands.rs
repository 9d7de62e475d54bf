//! Inline directive recognition.
//!
//! Control commands are matched by a fixed-priority rule table: engine
//! switch, parameter change, end-of-conversation phrase, captioning toggle.
//! The first rule that matches *and* extracts a command wins. Image markers
//! are only looked for in replies, through [`CommandParser::extract_image_directive`].

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, info};

/// Phrases that end a conversation when they are the whole message.
pub const END_CONVERSATION_PHRASES: &[&str] = &[
    "bye",
    "goodbye",
    "see you",
    "see you later",
    "talk to you",
    "talk to you later",
    "later",
    "bye bye",
    "quit",
    "exit",
    "restart conversation",
    "[restart]",
];

const ENGINE_SWITCH_PATTERN: &str = r"(?i)speak with (?P<model>[a-z0-9_.\-]+)";

const PARAMETER_PATTERN: &str = r"(?i)\b(?:set|change) (?:parameter (?P<named>\w+)|(?P<param>engine|temperature|top_p|max_tokens|max_length|length)) (?:to|as) (?P<value>[\w\-]+(?:\.[\w\-]+)*)(?:\s[^.]*)?\.(?:\s|$)";

const CAPTIONING_PATTERN: &str = r"(?i)\[captioning:\s*(?P<mode>\w+)\]";

const IMAGE_PATTERN: &str = r#"(?is)\[img:\s*"(?P<prompt>.*?)"\s*\]"#;

/// An opening `[img:` up to the next `]`, or to the end when unterminated.
const PARTIAL_IMAGE_PATTERN: &str = r"(?is)\[img:[^\]]*\]?";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SwitchModel(String),
    SetParameter { name: String, value: Value },
    EndConversation,
    /// `None` when the requested mode was neither `on` nor `off`.
    Captioning(Option<bool>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub command: Command,
    /// Input with the matched directive removed.
    pub residual: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDirective {
    /// Reply with every marker removed, trimmed.
    pub reply: String,
    pub prompt: Option<String>,
}

type Extractor = fn(&Captures<'_>, &[String]) -> Option<Command>;

struct CommandRule {
    name: &'static str,
    pattern: Regex,
    extract: Extractor,
}

pub struct CommandParser {
    rules: Vec<CommandRule>,
    image: Regex,
    partial_image: Regex,
}

impl CommandParser {
    /// Build the parser with the default end-of-conversation phrases.
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_end_phrases(END_CONVERSATION_PHRASES)
    }

    pub fn with_end_phrases<S: AsRef<str>>(phrases: &[S]) -> Result<Self, regex::Error> {
        let alternatives = phrases
            .iter()
            .map(|p| regex::escape(p.as_ref().trim()))
            .collect::<Vec<_>>()
            .join("|");
        let end_pattern = format!(r"(?i)^\s*(?:{alternatives})\s*$");

        let rules = vec![
            CommandRule {
                name: "engine_switch",
                pattern: Regex::new(ENGINE_SWITCH_PATTERN)?,
                extract: extract_engine_switch,
            },
            CommandRule {
                name: "parameter_change",
                pattern: Regex::new(PARAMETER_PATTERN)?,
                extract: extract_parameter_change,
            },
            CommandRule {
                name: "end_conversation",
                pattern: Regex::new(&end_pattern)?,
                extract: |_, _| Some(Command::EndConversation),
            },
            CommandRule {
                name: "captioning",
                pattern: Regex::new(CAPTIONING_PATTERN)?,
                extract: extract_captioning,
            },
        ];

        Ok(Self {
            rules,
            image: Regex::new(IMAGE_PATTERN)?,
            partial_image: Regex::new(PARTIAL_IMAGE_PATTERN)?,
        })
    }

    /// Whether `text` asks for a model switch, i.e. whether the model list is needed.
    #[must_use]
    pub fn mentions_model_switch(&self, text: &str) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.name == "engine_switch")
            .is_some_and(|rule| rule.pattern.is_match(text))
    }

    /// Recognize a control command in an inbound message.
    #[must_use]
    pub fn parse(&self, text: &str, available_models: &[String]) -> Option<ParsedCommand> {
        for rule in &self.rules {
            let Some(caps) = rule.pattern.captures(text) else {
                continue;
            };
            let Some(command) = (rule.extract)(&caps, available_models) else {
                debug!("Rule {} matched without a command, falling through", rule.name);
                continue;
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let residual = format!("{} {}", &text[..whole.start()], &text[whole.end()..])
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            info!("Recognized {} command: {command:?}", rule.name);
            return Some(ParsedCommand { command, residual });
        }
        None
    }

    /// Pull an `[img: "..."]` marker out of a reply.
    ///
    /// The prompt comes from the first well-formed marker. All markers, and any
    /// malformed `[img:` fragment, are stripped so none reach the user.
    #[must_use]
    pub fn extract_image_directive(&self, reply: &str) -> ImageDirective {
        let prompt = self
            .image
            .captures(reply)
            .and_then(|caps| caps.name("prompt"))
            .map(|m| m.as_str().trim().to_string());

        let cleaned = self.image.replace_all(reply, "");
        let cleaned = self.partial_image.replace_all(&cleaned, "");

        if prompt.is_none() && cleaned.len() != reply.len() {
            info!("Stripped malformed image marker from reply");
        }

        ImageDirective {
            reply: cleaned.trim().to_string(),
            prompt,
        }
    }
}

fn extract_engine_switch(caps: &Captures<'_>, available_models: &[String]) -> Option<Command> {
    let candidate = caps.name("model")?.as_str().trim_end_matches('.');
    available_models
        .iter()
        .find(|m| m.eq_ignore_ascii_case(candidate))
        .map(|m| Command::SwitchModel(m.clone()))
}

fn extract_parameter_change(caps: &Captures<'_>, _available_models: &[String]) -> Option<Command> {
    // The explicit `parameter <name>` group wins over the keyword group.
    let raw_name = caps.name("named").or_else(|| caps.name("param"))?.as_str();
    let raw_value = caps.name("value")?.as_str();
    Some(Command::SetParameter {
        name: canonical_parameter(raw_name),
        value: parse_literal(raw_value),
    })
}

fn extract_captioning(caps: &Captures<'_>, _available_models: &[String]) -> Option<Command> {
    let mode = caps.name("mode")?.as_str().to_lowercase();
    Some(Command::Captioning(match mode.as_str() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }))
}

fn canonical_parameter(name: &str) -> String {
    let name = name.to_lowercase();
    if name.contains("length") {
        "max_tokens".to_string()
    } else {
        name
    }
}

/// Numbers and booleans become typed values; anything else stays a string.
fn parse_literal(raw: &str) -> Value {
    match raw.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Number(_)) => v,
        _ => Value::String(raw.to_string()),
    }
}
