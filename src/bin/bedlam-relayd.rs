use bedlam_relay::config::{Config, RelayConfig};
use bedlam_relay::error::Result;
use bedlam_relay::relay;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bedlam-relayd")]
#[command(about = "Bedlam message relay and broadcast hub")]
struct Cli {
    #[arg(long, env = "BEDLAM_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "BEDLAM_RELAY_HOST")]
    host: Option<String>,

    #[arg(long, env = "BEDLAM_RELAY_PORT")]
    port: Option<u16>,

    #[arg(long)]
    keep_alive_seconds: Option<u64>,

    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bedlam_relay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let mut config: RelayConfig = match &cli.config {
        Some(path) => Config::from_file(path)?.relay_or_default(),
        None => RelayConfig::default(),
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(seconds) = cli.keep_alive_seconds {
        config.keep_alive_seconds = seconds;
    }
    config.strict_validation |= cli.strict;

    relay::run_with_shutdown(&config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
