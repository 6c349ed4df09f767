//! OAuth 2.0 authorization code server
//!
//! Issues short-lived authorization codes to allow-listed clients and exchanges
//! them for access and refresh tokens. All tokens are signed with keys generated
//! at startup, so nothing is persisted between runs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth_server::{router, AppState, Config};

#[derive(Parser, Debug)]
#[command(name = "auth-server")]
#[command(about = "OAuth 2.0 authorization code server")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8080, env = "PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "AUTH_BIND")]
    bind: String,

    /// Path to config directory
    #[arg(long, default_value = "./config", env = "AUTH_CONFIG_PATH")]
    config_path: String,

    /// Public URL for this service (used in OAuth metadata)
    #[arg(long, default_value = "http://localhost:8080", env = "AUTH_PUBLIC_URL")]
    public_url: String,

    /// Path prefix for the OAuth endpoints, e.g. /api/oauth
    #[arg(long, default_value = "", env = "AUTH_BASE_PATH")]
    base_path: String,

    /// Additional allowed client IDs
    #[arg(long = "allowed-client", env = "AUTH_ALLOWED_CLIENTS", value_delimiter = ',')]
    allowed_clients: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config_path)?;
    config.allow_clients(cli.allowed_clients);
    if config.allowed_client_ids.is_empty() {
        tracing::warn!("No allowed client IDs configured; every authorization request will be rejected");
    }

    let state = AppState::new(config, cli.public_url.clone())
        .context("Failed to initialize token codec")?
        .with_base_path(&cli.base_path);
    tracing::info!(
        "Allowing {} client(s), single-use codes {}",
        state.clients.len(),
        if state.config.exchange.single_use_codes { "enforced" } else { "not enforced" }
    );

    let app = router(Arc::new(state));

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;

    tracing::info!("Starting auth-server on {}", addr);
    tracing::info!("Public URL: {}", cli.public_url);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Auth server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
