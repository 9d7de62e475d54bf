#![warn(
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

//! Per-sender conversation handling.
//!
//! Every inbound message goes through the [`Orchestrator`]: it finds or
//! creates the sender's session, intercepts inline control commands,
//! forwards ordinary text to the completion provider and dispatches
//! image generation in the background. Idle sessions are restarted by
//! the [`ExpiryScheduler`], which reports expiries over a channel.

mod commands;
mod orchestrator;
mod session;
mod store;
mod timer;

pub use commands::{Command, CommandParser, END_CONVERSATION_PHRASES, ImageDirective, ParsedCommand};
pub use orchestrator::{
    CannedReplies, Collaborators, ConversationError, Orchestrator, OrchestratorConfig, TurnKind,
    TurnOutcome,
};
pub use session::{ConversationSession, SessionDefaults, SessionFlags, SystemPrompt};
pub use store::{SessionHandle, SessionStore, SessionUpdate};
pub use timer::{ExpiryScheduler, SessionExpired, TimerState};
