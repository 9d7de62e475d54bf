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

//! HTTP shell around the conversation orchestrator.
//!
//! Endpoints:
//! - `POST /whatsapp/reply`: Twilio inbound message webhook
//! - `POST /whatsapp/status`: Twilio delivery status callback
//! - `POST /chat`: synchronous JSON web chat
//! - `GET /health`

mod error;
mod payload;
mod routes;
mod server;

pub use error::{Error, Result};
pub use payload::{PayloadError, StatusCallback, TwilioWebhook};
pub use routes::{APOLOGY, AppState, ChatRequest, ChatResponse, build_router};
pub use server::serve;
