use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use chatrelay_conversation::Orchestrator;
use chatrelay_core::{
    ContactRegistry, Delivery, Fallback, InboundMessage, OutboundMessenger, send_or_fallback,
};

use crate::payload::{StatusCallback, TwilioWebhook};

/// Reply used when the orchestrator fails.
pub const APOLOGY: &str = "Sorry, something went wrong. Please try again later.";

/// Shared state for the HTTP server.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub messenger: Arc<dyn OutboundMessenger>,
    pub contacts: Arc<dyn ContactRegistry>,
    /// Strip `whatsapp:` from inbound sender ids.
    pub strip_transport_scheme: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "chatrelay",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run one message through the orchestrator, mapping failures to the apology.
async fn converse(state: &AppState, inbound: &InboundMessage) -> (String, Option<String>) {
    match state.orchestrator.handle(inbound).await {
        Ok(outcome) => {
            info!("[{}] {:?} turn", inbound.sender_id, outcome.kind);
            (outcome.reply, outcome.image_prompt)
        }
        Err(e) => {
            error!("[{}] Conversation failed: {e}", inbound.sender_id);
            (APOLOGY.to_string(), None)
        }
    }
}

/// POST /whatsapp/reply
async fn whatsapp_reply(
    State(state): State<Arc<AppState>>,
    Form(form): Form<TwilioWebhook>,
) -> impl IntoResponse {
    let inbound = match form.into_inbound(state.strip_transport_scheme) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!("Rejected webhook: {e}");
            return (StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    if !state.contacts.is_allowed(&inbound.sender_id) {
        warn!("Rejected message from unknown sender {}", inbound.sender_id);
        return (StatusCode::FORBIDDEN, "Forbidden".to_string());
    }

    info!(
        "[{}] Message from {}",
        inbound.sender_id,
        inbound.display_name()
    );
    let (reply, _) = converse(&state, &inbound).await;
    if reply.trim().is_empty() {
        return (StatusCode::OK, String::new());
    }

    let fallback = state.orchestrator.replies().not_understood.clone();
    let delivery = send_or_fallback(
        state.messenger.as_ref(),
        &reply,
        &inbound.sender_id,
        Some(Fallback::Text(&fallback)),
    )
    .await;
    if delivery == Delivery::Failed {
        error!("[{}] Reply could not be delivered", inbound.sender_id);
    }

    (StatusCode::OK, String::new())
}

/// POST /whatsapp/status
async fn whatsapp_status(Form(status): Form<StatusCallback>) -> impl IntoResponse {
    info!(
        "Delivery status for {}: {} (to={}, error={})",
        status.message_sid.as_deref().unwrap_or("unknown"),
        status.message_status.as_deref().unwrap_or("unknown"),
        status.to.as_deref().unwrap_or("unknown"),
        status.error_code.as_deref().unwrap_or("none"),
    );
    Json(serde_json::json!({"status": "ok"}))
}

/// POST /chat
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    let mut inbound = InboundMessage::text(request.sender_id, request.message);
    inbound.sender_name = request.sender_name;
    let (reply, image_prompt) = converse(&state, &inbound).await;
    Json(ChatResponse {
        reply,
        image_prompt,
    })
}

/// Build the relay's HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/whatsapp/reply", post(whatsapp_reply))
        .route("/whatsapp/status", post(whatsapp_status))
        .route("/chat", post(chat))
        .with_state(state)
}
