use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use chatrelay_config::{Config, ContactBook};
use chatrelay_core::{ContactRegistry, OutboundMessenger};
use chatrelay_providers::TwilioMessenger;
use chatrelay_whatsapp::AppState;

use super::Relay;

/// Input for the WhatsApp webhook server.
pub struct ServeInput {
    /// Overrides `whatsapp.listen`.
    pub listen: Option<String>,
}

/// Strategy for running the WhatsApp webhook server.
#[derive(Debug, Clone, Copy)]
pub struct ServeStrategy;

impl super::CommandStrategy for ServeStrategy {
    type Input = ServeInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let whatsapp = &config.whatsapp;

        if !whatsapp.enabled {
            anyhow::bail!("WhatsApp is not enabled in config. Set \"whatsapp.enabled\": true");
        }
        if whatsapp.account_sid.is_empty() || whatsapp.auth_token.is_empty() {
            anyhow::bail!(
                "Twilio credentials not configured. Set \"whatsapp.account_sid\" and \"whatsapp.auth_token\""
            );
        }

        let contacts: Arc<dyn ContactRegistry> = Arc::new(ContactBook::load(
            whatsapp.contacts_path.as_deref(),
            &whatsapp.allow_from,
            whatsapp.strip_transport_scheme,
        )?);
        let messenger: Arc<dyn OutboundMessenger> = Arc::new(TwilioMessenger::new(
            whatsapp.account_sid.clone(),
            whatsapp.auth_token.clone(),
            whatsapp.from_number.clone(),
        ));

        let relay = Relay::start(&config, messenger.clone(), contacts.clone())?;
        let state = Arc::new(AppState {
            orchestrator: relay.orchestrator.clone(),
            messenger,
            contacts,
            strip_transport_scheme: whatsapp.strip_transport_scheme,
        });

        let shutdown = CancellationToken::new();
        let ctrl_c = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
            }
            ctrl_c.cancel();
        });

        let listen = input.listen.unwrap_or_else(|| whatsapp.listen.clone());
        info!("WhatsApp relay is running. Press Ctrl+C to stop.");
        let served = chatrelay_whatsapp::serve(&listen, state, shutdown).await;

        relay.shutdown().await;
        served?;
        Ok(())
    }
}
