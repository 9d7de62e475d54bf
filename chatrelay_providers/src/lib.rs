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

mod assemblyai;
mod openai;
pub mod retry;
mod twilio;

pub use assemblyai::{AssemblyAiTranscriber, language_code};
pub use openai::OpenAiProvider;
pub use twilio::TwilioMessenger;
