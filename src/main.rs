//! Gateway binary entrypoint.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use strikesight::api::server::{start_server, AppState};
use strikesight::config::GatewayConfig;
use strikesight::providers::GeminiProvider;

#[derive(Parser, Debug)]
#[command(name = "strikesight", version, about = "AI explanation gateway for options analytics")]
struct Cli {
    /// Bind address (overrides STRIKESIGHT_BIND).
    #[arg(long)]
    bind: Option<String>,

    /// Listen port (overrides STRIKESIGHT_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Load environment from a specific .env file instead of ./.env.
    #[arg(long, value_name = "FILE")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load env file {}", path.display()))?;
        }
        None => {
            // Missing ./.env is fine; the environment may be set directly.
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("strikesight=info,tower_http=warn")),
        )
        .init();

    let mut config = GatewayConfig::from_env();
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let provider =
        GeminiProvider::from_config(config.gemini.api_key.as_deref(), &config.gemini.model)
            .context("no Gemini credentials found: set GEMINI_API_KEY or GOOGLE_API_KEY")?;

    tracing::info!(
        model = %config.gemini.model,
        backend = %config.backend_base_url,
        auth_enabled = config.api_token.is_some(),
        "starting strikesight gateway"
    );

    start_server(AppState::new(config, Arc::new(provider))).await
}
