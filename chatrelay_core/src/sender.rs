//! Conversational counterparts and their per-sender limits.

use serde::{Deserialize, Serialize};

/// Caps applied to a single sender's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderLimits {
    /// `None` means unbounded.
    pub max_messages: Option<u32>,
    pub max_image_generations: u32,
    pub voice_transcription: bool,
    pub transcription_language: Option<String>,
}

impl Default for SenderLimits {
    fn default() -> Self {
        Self {
            max_messages: None,
            max_image_generations: 3,
            voice_transcription: true,
            transcription_language: None,
        }
    }
}

impl SenderLimits {
    #[must_use]
    pub fn messages_exhausted(&self, message_count: u32) -> bool {
        self.max_messages.is_some_and(|max| message_count >= max)
    }

    #[must_use]
    pub const fn images_exhausted(&self, images_generated: u32) -> bool {
        images_generated >= self.max_image_generations
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Phone number or chat identity; the session key.
    pub id: String,
    pub name: String,
    pub country: Option<String>,
    pub limits: SenderLimits,
}

impl Sender {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            country: None,
            limits: SenderLimits::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: SenderLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// An entry of the contacts registry. Unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub max_messages: Option<u32>,
    #[serde(default)]
    pub max_image_generations: Option<u32>,
    #[serde(default)]
    pub voice_transcription: Option<bool>,
    #[serde(default)]
    pub transcription_language: Option<String>,
}

impl Contact {
    #[must_use]
    pub fn limits(&self, defaults: &SenderLimits) -> SenderLimits {
        SenderLimits {
            max_messages: self.max_messages.or(defaults.max_messages),
            max_image_generations: self
                .max_image_generations
                .unwrap_or(defaults.max_image_generations),
            voice_transcription: self
                .voice_transcription
                .unwrap_or(defaults.voice_transcription),
            transcription_language: self
                .transcription_language
                .clone()
                .or_else(|| defaults.transcription_language.clone()),
        }
    }
}

/// Read-mostly lookup of who may talk to the relay and with which limits.
pub trait ContactRegistry: Send + Sync {
    fn lookup(&self, sender_id: &str) -> Option<Contact>;
    fn is_allowed(&self, sender_id: &str) -> bool;
}

/// Registry without contacts: everyone is allowed, nobody has overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ContactRegistry for AllowAll {
    fn lookup(&self, _sender_id: &str) -> Option<Contact> {
        None
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        true
    }
}
