//! Local interactive chat through the orchestrator, without any messaging
//! provider.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use chatrelay_config::Config;
use chatrelay_core::{AllowAll, InboundMessage, OutboundMessenger};

use super::Relay;

const LOCAL_SENDER: &str = "cli:local";

/// Prints deliveries (generated images, expiry notices) to stdout.
struct StdoutMessenger;

#[async_trait]
impl OutboundMessenger for StdoutMessenger {
    async fn send(
        &self,
        text: Option<&str>,
        _recipient: &str,
        media_url: Option<&str>,
    ) -> anyhow::Result<String> {
        match (text, media_url) {
            (caption, Some(url)) => {
                println!("\n[image] {url}");
                if let Some(caption) = caption.filter(|c| !c.is_empty()) {
                    println!("{caption}");
                }
            }
            (Some(text), None) => println!("\n{text}"),
            (None, None) => anyhow::bail!("Nothing to print"),
        }
        Ok("stdout".to_string())
    }
}

/// Strategy for chatting with the relay from the terminal.
#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

impl super::CommandStrategy for ChatStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;
        let relay = Relay::start(&config, Arc::new(StdoutMessenger), Arc::new(AllowAll))?;

        println!("=== chatrelay local chat ===");
        println!("Type 'exit', 'quit', or Ctrl+D to leave.\n");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if matches!(line, "exit" | "quit" | "q") {
                break;
            }
            if line.is_empty() {
                continue;
            }

            let inbound = InboundMessage::text(LOCAL_SENDER, line);
            match relay.orchestrator.handle(&inbound).await {
                Ok(outcome) => {
                    debug!("{:?} turn", outcome.kind);
                    println!("\n{}\n", outcome.reply);
                    if outcome.image_dispatched {
                        println!("(generating an image...)\n");
                    }
                }
                Err(e) => eprintln!("Error: {e}"),
            }
        }

        relay.orchestrator.drain_background().await;
        relay.shutdown().await;
        Ok(())
    }
}
