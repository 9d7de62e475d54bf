//! Twilio webhook form payloads.

use serde::Deserialize;
use thiserror::Error;

use chatrelay_core::{InboundMessage, Media};

const SCHEME: &str = "whatsapp:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

/// Form fields Twilio posts for an inbound WhatsApp message.
#[derive(Debug, Default, Deserialize)]
pub struct TwilioWebhook {
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "ProfileName")]
    pub profile_name: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
    #[serde(rename = "NumMedia")]
    pub num_media: Option<String>,
    #[serde(rename = "MediaUrl0")]
    pub media_url: Option<String>,
    #[serde(rename = "MediaContentType0")]
    pub media_content_type: Option<String>,
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
}

impl TwilioWebhook {
    /// Canonical inbound record. `From` and `Body` must be present; `Body`
    /// may be empty for media-only messages.
    pub fn into_inbound(self, strip_scheme: bool) -> Result<InboundMessage, PayloadError> {
        let from = self
            .from
            .filter(|f| !f.trim().is_empty())
            .ok_or(PayloadError::MissingField("From"))?;
        let body = self.body.ok_or(PayloadError::MissingField("Body"))?;

        let from = from.trim();
        let sender_id = if strip_scheme {
            from.strip_prefix(SCHEME).unwrap_or(from)
        } else {
            from
        };

        let has_media = self
            .num_media
            .as_deref()
            .and_then(|n| n.trim().parse::<u32>().ok())
            .is_some_and(|n| n > 0);
        let media = match (has_media, self.media_url) {
            (true, Some(url)) => Some(Media {
                url,
                content_type: self.media_content_type.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(InboundMessage {
            body: Some(body),
            sender_id: sender_id.to_string(),
            sender_name: self.profile_name.filter(|n| !n.trim().is_empty()),
            media,
        })
    }
}

/// Delivery status callback.
#[derive(Debug, Default, Deserialize)]
pub struct StatusCallback {
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
    #[serde(rename = "MessageStatus")]
    pub message_status: Option<String>,
    #[serde(rename = "To")]
    pub to: Option<String>,
    #[serde(rename = "ErrorCode")]
    pub error_code: Option<String>,
}
