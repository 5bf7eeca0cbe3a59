use std::sync::Arc;

use bedlam_relay::client::Participant;
use bedlam_relay::config::{Config, ParticipantConfig};
use bedlam_relay::domains::envelope::{Envelope, MessageKind};
use bedlam_relay::error::{BedlamError, Result};
use bedlam_relay::services::connection::{ConnectionState, MessageCallback};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bedlam")]
#[command(about = "Bedlam game participant")]
struct Cli {
    #[arg(long, env = "BEDLAM_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "BEDLAM_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, env = "BEDLAM_USER_ID")]
    user_id: Option<String>,

    #[arg(long, default_value_t = false)]
    auto_reconnect: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print every message delivered to this participant.
    Listen,
    /// Dispatch one message and exit.
    Send {
        #[arg(long = "type")]
        kind: String,

        #[arg(long)]
        data: String,

        #[arg(long)]
        recipient: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,bedlam_relay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let mut config: ParticipantConfig = match &cli.config {
        Some(path) => Config::from_file(path)?.participant_or_default(),
        None => ParticipantConfig::default(),
    };
    if cli.endpoint.is_some() {
        config.endpoint_url = cli.endpoint.clone();
    }
    if cli.user_id.is_some() {
        config.local_participant_id = cli.user_id.clone();
    }
    config.auto_reconnect |= cli.auto_reconnect;

    let endpoint = config
        .endpoint_url
        .clone()
        .ok_or_else(|| BedlamError::Config("--endpoint is required".to_string()))?;

    match cli.command {
        Commands::Listen => listen(&config).await,
        Commands::Send {
            kind,
            data,
            recipient,
        } => {
            let participant = Participant::new(&config, None)?;
            let kind: MessageKind = kind.parse()?;
            let message_id = participant
                .send_to(&endpoint, kind, &data, recipient.as_deref())
                .await?;
            println!("{message_id}");
            Ok(())
        }
    }
}

async fn listen(config: &ParticipantConfig) -> Result<()> {
    let on_message: MessageCallback = Arc::new(|envelope: Envelope| {
        match envelope.to_json() {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("{err}"),
        }
    });
    let participant = Participant::new(config, Some(on_message))?;
    participant.start().await;

    let mut state = participant.watch_state();
    if *state.borrow_and_update() == ConnectionState::Disconnected {
        return Err(BedlamError::Runtime("could not reach the hub".to_string()));
    }
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state.borrow() == ConnectionState::Disconnected {
                    participant.stop().await;
                    return Err(BedlamError::Runtime("hub connection lost".to_string()));
                }
            }
        }
    }
    participant.stop().await;
    Ok(())
}
