//! Switchboard binary: HTTP status surface plus the cluster peer link.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use meshward_common::DispatchKey;
use switchboard::cluster::{PeerLink, PeerTransport, UdpPeerTransport};
use switchboard::config::{AppConfig, Overrides};
use switchboard::cookie::mint_login_token_with_redis;
use switchboard::events::{LogSink, Target};
use switchboard::routes;
use switchboard::state::AppState;

/// Meshward Switchboard - coordination engine
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/switchboard.toml")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,

    /// Print a login token for this user id and exit
    #[arg(long, value_name = "USER")]
    login_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Meshward Switchboard v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let overrides = Overrides {
        redis_url: args.redis_url.clone(),
        listen: args.listen.clone(),
    };
    let config = AppConfig::load(&args.config, &overrides)?;
    let server_id = config.server_id();
    info!(server_id = %server_id, "Configuration loaded from {}", args.config);

    if let Some(user) = &args.login_token {
        let timeout = config.cookies.timeout_minutes;
        let token = mint_login_token_with_redis(&config.redis_url, timeout, user).await?;
        println!("{}", token);
        return Ok(());
    }

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Peer transport, only when other servers are configured
    let (peers, outbound) = if config.cluster.is_enabled() {
        let (transport, outbound) = UdpPeerTransport::new(server_id.clone());
        let transport: Arc<dyn PeerTransport> = Arc::new(transport);
        (Some(transport), Some(outbound))
    } else {
        (None, None)
    };

    // Initialize application state
    let state = AppState::connect(config.clone(), peers).await?;
    info!("Redis connected: {}", config.redis_url);

    let mut sender_task = None;
    if let Some(outbound) = outbound {
        let link = Arc::new(PeerLink::new(config.cluster.clone(), server_id.clone()));

        let sender = link.clone();
        let sender_shutdown = shutdown_tx.subscribe();
        sender_task = Some(tokio::spawn(async move {
            if let Err(e) = sender.run_sender(outbound, sender_shutdown).await {
                tracing::error!(error = %e, "Peer sender failed");
            }
        }));

        let receiver = link;
        let coordinator = state.coordinator.clone();
        let receiver_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = receiver.run_receiver(coordinator, receiver_shutdown).await {
                tracing::error!(error = %e, "Peer receiver failed");
            }
        });

        info!(peers = config.cluster.peers.len(), "Cluster mode enabled");
    }

    {
        let mut coordinator = state.coordinator.write().await;
        let sink: Target = Arc::new(LogSink);
        coordinator.bus_mut().subscribe(&[DispatchKey::wildcard()], &sink);
        coordinator.server_started();
    }

    // Build router
    let app = routes::create_router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Switchboard listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    state.coordinator.read().await.server_stopped();
    let _ = shutdown_tx.send(());
    if let Some(task) = sender_task {
        let _ = task.await;
    }

    info!("Switchboard shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
