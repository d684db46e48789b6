//! Baseline proxy daemon entry point

use baseline_proxy::{ProxyConfig, ProxyError, Server};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Baseline protocol proxy
#[derive(Parser)]
#[command(name = "baseline-proxy")]
#[command(about = "Per-organization baseline protocol proxy", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BASELINE_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "BASELINE_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "BASELINE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "BASELINE_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = ProxyConfig::load(cli.config.as_deref())
        .map_err(|err| ProxyError::Config(err.to_string()))?;

    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|err| ProxyError::Config(format!("invalid listen address: {err}")))?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        organization = ?config.organization.address,
        "starting baseline proxy"
    );

    let server = Server::new(config).await?;
    server.run().await
}
