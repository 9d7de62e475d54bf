#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod delivery;
pub mod inbound;
pub mod params;
pub mod sender;

pub use delivery::{Delivery, Fallback, send_or_fallback};
pub use inbound::{InboundMessage, Media, MediaKind, redact_url, scrub_url};
pub use params::{CompletionParams, ParamError};
pub use sender::{AllowAll, Contact, ContactRegistry, Sender, SenderLimits};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ParamError::UnknownRole(other.to_string())),
        }
    }
}

/// One entry of a conversation. Only `role` and `content` go over the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Text generation service the conversation is forwarded to.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> anyhow::Result<LLMResponse>;

    /// Model identifiers a sender may switch to.
    async fn available_models(&self) -> anyhow::Result<Vec<String>>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns the URL of the generated image.
    async fn generate_image(&self, prompt: &str) -> anyhow::Result<String>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// `Ok(None)` means the service gave up (e.g. poll timeout).
    async fn transcribe(
        &self,
        media_url: &str,
        language_hint: Option<&str>,
    ) -> anyhow::Result<Option<String>>;
}

/// Delivers text and/or media to a sender through the messaging provider.
#[async_trait]
pub trait OutboundMessenger: Send + Sync {
    /// Returns the provider's delivery id.
    async fn send(
        &self,
        text: Option<&str>,
        recipient: &str,
        media_url: Option<&str>,
    ) -> anyhow::Result<String>;
}
