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

mod contacts;
mod schema;

pub use contacts::{ContactBook, TRANSPORT_SCHEME};
pub use schema::{
    AgentDefaults, AgentsConfig, AssemblyAiConfig, Config, LimitsConfig, OpenAiConfig,
    ProvidersConfig, TelegramConfig, WhatsAppConfig, mask_key,
};
