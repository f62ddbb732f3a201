// src/main.rs
// Binary entrypoint: load config, wire state, serve the HTTP surface.

use std::net::SocketAddr;

use clap::Parser;

use dbnotebook_core::api::http;
use dbnotebook_core::config::AppConfig;
use dbnotebook_core::state::AppState;

/// CLI overrides layered on top of the environment-driven `AppConfig`; flags
/// win when both a flag and the corresponding env var are set.
#[derive(Parser)]
#[command(name = "dbnotebook-server")]
#[command(about = "RAG + Text-to-SQL core service")]
struct Args {
    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Bind host (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::from_env();

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    config.validate()?;

    tracing::info!("starting dbnotebook-server");

    let state = AppState::build(config.clone()).await?;
    let app = http::router().with_state(state);

    let addr: SocketAddr = config.server.bind_address().parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
