//! Configuration management for Switchboard.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use meshward_common::ServerId;
use meshward_common::constants::cookie::DEFAULT_TIMEOUT_MINUTES;
use meshward_common::constants::{DEFAULT_LISTEN_ADDR, DEFAULT_PEER_BIND_ADDR, DEFAULT_REDIS_URL};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// This server's identity in the cluster (auto-generated if not set)
    #[serde(default = "generate_server_id")]
    pub server_id: String,

    /// Cluster membership
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Session cookie settings
    #[serde(default)]
    pub cookies: CookieConfig,
}

/// Cluster membership. Cluster mode is on when any peer is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// UDP address the peer receiver binds to
    #[serde(default = "default_peer_bind_addr")]
    pub bind_addr: String,

    /// Other servers: server id -> UDP address
    #[serde(default)]
    pub peers: BTreeMap<String, String>,
}

impl ClusterConfig {
    pub fn is_enabled(&self) -> bool {
        !self.peers.is_empty()
    }

    pub fn peer_ids(&self) -> Vec<ServerId> {
        self.peers.keys().map(|id| ServerId::new(id.as_str())).collect()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_peer_bind_addr(),
            peers: BTreeMap::new(),
        }
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// Hex server cookie key (ephemeral key when unset)
    #[serde(default)]
    pub server_key_hex: Option<String>,

    /// Cookie validity window in minutes
    #[serde(default = "default_cookie_timeout")]
    pub timeout_minutes: u64,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            server_key_hex: None,
            timeout_minutes: default_cookie_timeout(),
        }
    }
}

/// Values taken from the command line or environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub redis_url: Option<String>,
    pub listen: Option<String>,
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_peer_bind_addr() -> String { DEFAULT_PEER_BIND_ADDR.to_string() }
fn default_cookie_timeout() -> u64 { DEFAULT_TIMEOUT_MINUTES }

fn generate_server_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("server-{:08x}", rng.random::<u32>())
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, overrides: &Overrides) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };

        if let Some(ref redis_url) = overrides.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = overrides.listen {
            config.listen_addr = listen.clone();
        }

        config.cluster.peers.remove(&config.server_id);

        Ok(config)
    }

    pub fn server_id(&self) -> ServerId {
        ServerId::new(self.server_id.as_str())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            server_id: generate_server_id(),
            cluster: ClusterConfig::default(),
            cookies: CookieConfig::default(),
        }
    }
}
