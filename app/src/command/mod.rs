//! Static strategy pattern for CLI commands.
//!
//! Each subcommand is its own strategy type with its own input, dispatched
//! statically from `main`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use chatrelay_config::Config;
use chatrelay_conversation::{
    Collaborators, Orchestrator, OrchestratorConfig, SessionDefaults, SessionFlags, SystemPrompt,
};
use chatrelay_core::{ContactRegistry, OutboundMessenger, Transcriber};
use chatrelay_providers::{AssemblyAiTranscriber, OpenAiProvider};

mod chat;
mod info;
mod init;
mod serve;
mod telegram;
mod version;

pub use chat::ChatStrategy;
pub use info::InfoStrategy;
pub use init::InitStrategy;
pub use serve::{ServeInput, ServeStrategy};
pub use telegram::{TelegramInput, TelegramStrategy};
pub use version::VersionStrategy;

/// Contract for all command strategies.
///
/// Each strategy defines its own input type; calls are monomorphized, no
/// trait objects involved.
pub trait CommandStrategy: Send + Sync + 'static {
    type Input;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

/// Orchestrator settings derived from the config file.
pub fn orchestrator_config(config: &Config) -> anyhow::Result<OrchestratorConfig> {
    let agent = &config.agents.defaults;

    let mut defaults = SessionDefaults {
        params: agent.completion_params(),
        flags: SessionFlags {
            caption_images: agent.caption_images,
            voice_transcription: agent.voice_transcription,
            allow_images: agent.allow_images,
        },
        limits: config.sender_limits(),
        ..SessionDefaults::default()
    };
    if let Some(template) = agent.resolve_system_prompt()? {
        defaults.system_prompt = SystemPrompt::Template(template);
    }
    if let Some(goodbye) = &agent.goodbye_message {
        defaults.goodbye_message.clone_from(goodbye);
    }

    Ok(OrchestratorConfig {
        defaults,
        expire_after: agent.conversation_expiry(),
        available_models: agent.available_models.clone(),
        ..OrchestratorConfig::default()
    })
}

/// A running orchestrator and its expiry loop.
pub struct Relay {
    pub orchestrator: Arc<Orchestrator>,
    expiry: JoinHandle<()>,
}

impl Relay {
    /// Wire the configured providers to `messenger` and `contacts` and start
    /// the expiry loop.
    pub fn start(
        config: &Config,
        messenger: Arc<dyn OutboundMessenger>,
        contacts: Arc<dyn ContactRegistry>,
    ) -> anyhow::Result<Self> {
        let openai = Arc::new(
            OpenAiProvider::new(config.providers.openai.api_key.clone())
                .with_base_url(config.providers.openai.base_url.clone()),
        );
        let transcriber = config.providers.assemblyai.as_ref().map(|assemblyai| {
            Arc::new(
                AssemblyAiTranscriber::new(assemblyai.api_key.clone())
                    .with_poll_timeout(Duration::from_secs(assemblyai.poll_timeout_secs)),
            ) as Arc<dyn Transcriber>
        });
        if transcriber.is_none() {
            info!("No AssemblyAI key configured, voice notes will not be transcribed");
        }

        let collab = Collaborators {
            completion: openai.clone(),
            images: openai,
            transcriber,
            messenger,
            contacts,
        };
        let (orchestrator, expired) = Orchestrator::new(collab, orchestrator_config(config)?)?;
        let orchestrator = Arc::new(orchestrator);
        let expiry = orchestrator.spawn_expiry_loop(expired);

        Ok(Self {
            orchestrator,
            expiry,
        })
    }

    /// Cancel timers, abort image tasks and wait for the expiry loop.
    pub async fn shutdown(self) {
        self.orchestrator.shutdown();
        if let Err(e) = self.expiry.await {
            tracing::warn!("Expiry loop ended abnormally: {e}");
        }
        info!("Relay stopped");
    }
}
