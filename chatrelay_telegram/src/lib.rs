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

//! Telegram transport: a teloxide bot that feeds chats through the
//! conversation orchestrator.

mod bot;
mod command;
mod error;
mod handler;
mod messenger;

pub use bot::TelegramBot;
pub use command::Command;
pub use error::{Error, Result};
pub use handler::{APOLOGY, handle_command, handle_message};
pub use messenger::TelegramMessenger;
