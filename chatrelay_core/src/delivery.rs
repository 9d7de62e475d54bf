//! Outbound delivery with an `on_failure` fallback.

use tracing::{error, warn};

use crate::OutboundMessenger;

/// What to do when the primary delivery fails.
pub enum Fallback<'a> {
    /// Send this canned text instead.
    Text(&'a str),
    /// Hand the error to a callback; a returned text is sent instead.
    Callback(&'a (dyn Fn(&anyhow::Error) -> Option<String> + Send + Sync)),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent(String),
    FallbackSent(String),
    Failed,
}

/// Deliver `text` to `recipient`, falling back as configured. Never returns an error.
pub async fn send_or_fallback(
    messenger: &dyn OutboundMessenger,
    text: &str,
    recipient: &str,
    fallback: Option<Fallback<'_>>,
) -> Delivery {
    let err = match messenger.send(Some(text), recipient, None).await {
        Ok(id) => return Delivery::Sent(id),
        Err(e) => e,
    };
    warn!("Delivery to {recipient} failed: {err}");

    let fallback_text = match fallback {
        Some(Fallback::Text(t)) => Some(t.to_string()),
        Some(Fallback::Callback(cb)) => cb(&err),
        None => None,
    };
    let Some(fallback_text) = fallback_text else {
        return Delivery::Failed;
    };

    match messenger.send(Some(&fallback_text), recipient, None).await {
        Ok(id) => Delivery::FallbackSent(id),
        Err(e) => {
            error!("Fallback delivery to {recipient} failed: {e}");
            Delivery::Failed
        }
    }
}
