//! Application state and shared resources.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::cluster::PeerTransport;
use crate::config::AppConfig;
use crate::cookie::{CookieCodec, CookieKey, load_or_create_login_key};
use crate::coordinator::{Coordinator, SharedCoordinator};
use crate::events::RedisEventStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Redis connection manager (auto-reconnecting). `None` when running detached.
    pub redis: Option<ConnectionManager>,

    /// Connectivity tables and event bus
    pub coordinator: SharedCoordinator,

    /// Codec for cookies minted by this server
    pub server_cookies: Arc<CookieCodec>,

    /// Codec for login tokens (key shared through Redis)
    pub login_cookies: Arc<CookieCodec>,

    /// Process start, for uptime reporting
    pub started_at: std::time::Instant,
}

impl AppState {
    /// Create new application state, connecting to Redis
    pub async fn connect(config: AppConfig, peers: Option<Arc<dyn PeerTransport>>) -> Result<Self> {
        // Connect to Redis with connection manager (handles reconnection)
        let client = redis::Client::open(config.redis_url.as_str())
            .context("Failed to create Redis client")?;

        let mut redis = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        let login_key = load_or_create_login_key(&mut redis).await?;

        let mut coordinator = Coordinator::new(config.server_id(), config.cluster.peer_ids())
            .with_store(Arc::new(RedisEventStore::new(redis.clone())));
        if let Some(peers) = peers {
            coordinator = coordinator.with_peers(peers);
        }

        Self::from_parts(config, Some(redis), coordinator, login_key)
    }

    /// Assemble state from already-built pieces
    pub fn from_parts(
        config: AppConfig,
        redis: Option<ConnectionManager>,
        coordinator: Coordinator,
        login_key: CookieKey,
    ) -> Result<Self> {
        let server_key = match &config.cookies.server_key_hex {
            Some(hex_key) => CookieKey::from_hex(hex_key).context("Invalid cookies.server_key_hex")?,
            None => {
                tracing::warn!("Using ephemeral server cookie key (will change on restart)");
                CookieKey::generate()
            }
        };

        let timeout = config.cookies.timeout_minutes;
        let server_cookies = CookieCodec::new(server_key)
            .context("Server cookie key rejected")?
            .with_timeout(timeout);
        let login_cookies = CookieCodec::new(login_key)
            .context("Login cookie key rejected")?
            .with_timeout(timeout);

        Ok(Self {
            config,
            redis,
            coordinator: coordinator.into_shared(),
            server_cookies: Arc::new(server_cookies),
            login_cookies: Arc::new(login_cookies),
            started_at: std::time::Instant::now(),
        })
    }
}
