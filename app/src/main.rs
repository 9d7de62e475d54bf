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

mod command;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use command::{
    ChatStrategy, CommandStrategy, InfoStrategy, InitStrategy, ServeInput, ServeStrategy,
    TelegramInput, TelegramStrategy, VersionStrategy,
};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Conversational relay between messaging apps and a completion API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WhatsApp webhook server
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Run the Telegram bot
    Telegram {
        /// Bot token (overrides config)
        #[arg(short, long)]
        token: Option<String>,

        /// Allowed chat IDs (overrides config)
        #[arg(short, long, value_delimiter = ',')]
        allow_from: Option<Vec<String>>,
    },
    /// Chat with the relay from the terminal
    Chat,
    /// Initialize configuration
    Init,
    /// Show configuration with secrets masked
    Info,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen } => ServeStrategy.execute(ServeInput { listen }).await,
        Commands::Telegram { token, allow_from } => {
            TelegramStrategy
                .execute(TelegramInput { token, allow_from })
                .await
        }
        Commands::Chat => ChatStrategy.execute(()).await,
        Commands::Init => InitStrategy.execute(()).await,
        Commands::Info => InfoStrategy.execute(()).await,
        Commands::Version => VersionStrategy.execute(()).await,
    }
}
