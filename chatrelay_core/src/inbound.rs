//! Canonical inbound record produced by every transport.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    pub content_type: String,
}

impl Media {
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        let content_type = self.content_type.to_lowercase();
        if content_type.starts_with("image") {
            MediaKind::Image
        } else if content_type.starts_with("audio") {
            MediaKind::Audio
        } else if content_type.starts_with("video") {
            MediaKind::Video
        } else {
            MediaKind::Other
        }
    }
}

/// `scheme://host/...` with the path and query dropped. Media URLs can carry
/// credentials in the path (Telegram file URLs embed the bot token).
#[must_use]
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "<redacted>".to_string();
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = host.rsplit('@').next().unwrap_or(host);
    format!("{scheme}://{host}/...")
}

/// `text` with every occurrence of `url` replaced by its redacted form.
#[must_use]
pub fn scrub_url(text: &str, url: &str) -> String {
    if url.is_empty() {
        return text.to_string();
    }
    text.replace(url, &redact_url(url))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub body: Option<String>,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub media: Option<Media>,
}

impl InboundMessage {
    #[must_use]
    pub fn text(sender_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            sender_id: sender_id.into(),
            sender_name: None,
            media: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_media(mut self, media: Media) -> Self {
        self.media = Some(media);
        self
    }

    /// Display name, falling back to the sender id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_from_content_type() {
        let media = |ct: &str| Media {
            url: "https://example.com/m".to_string(),
            content_type: ct.to_string(),
        };
        assert_eq!(media("audio/ogg").kind(), MediaKind::Audio);
        assert_eq!(media("IMAGE/jpeg").kind(), MediaKind::Image);
        assert_eq!(media("video/mp4").kind(), MediaKind::Video);
        assert_eq!(media("application/pdf").kind(), MediaKind::Other);
    }

    #[test]
    fn redacted_url_keeps_only_the_host() {
        let url = "https://api.telegram.org/file/bot123:SECRET/voice/file_7.oga";
        assert_eq!(redact_url(url), "https://api.telegram.org/...");
        assert_eq!(
            redact_url("https://user:pw@media.test/a.ogg?sig=abc"),
            "https://media.test/..."
        );
        assert_eq!(redact_url("not a url"), "<redacted>");
    }

    #[test]
    fn scrub_removes_embedded_url() {
        let url = "https://api.telegram.org/file/bot123:SECRET/voice/file_7.oga";
        let scrubbed = scrub_url(&format!("Download error, unable to download {url}"), url);
        assert!(!scrubbed.contains("SECRET"));
        assert!(scrubbed.ends_with("https://api.telegram.org/..."));
        assert_eq!(scrub_url("no url here", ""), "no url here");
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let msg = InboundMessage::text("+15550001", "hi");
        assert_eq!(msg.display_name(), "+15550001");
        assert_eq!(msg.with_name("Ana").display_name(), "Ana");
    }
}
