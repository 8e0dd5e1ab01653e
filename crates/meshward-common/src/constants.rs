//! Shared constants for Meshward components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default Switchboard HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8880";

/// Default bind address for the peer transport (inside the cluster network)
pub const DEFAULT_PEER_BIND_ADDR: &str = "0.0.0.0:9000";

/// Largest peer datagram we accept
pub const MAX_PEER_DATAGRAM: usize = 64 * 1024;

/// Dispatch key matching every subscriber interested in all events
pub const WILDCARD_KEY: &str = "*";

/// Session cookie settings
pub mod cookie {
    /// Default cookie validity window (minutes)
    pub const DEFAULT_TIMEOUT_MINUTES: u64 = 2;

    /// Tolerated clock skew for cookies minted "in the future" (milliseconds)
    pub const FUTURE_SKEW_MS: i64 = 30_000;

    /// Size of a freshly generated cookie key (covers both cipher schemes)
    pub const KEY_LEN: usize = 80;

    /// Minimum key size for the AES-GCM scheme
    pub const GCM_KEY_LEN: usize = 32;

    /// Minimum key size for the legacy AES-CBC / HMAC-SHA384 scheme
    pub const LEGACY_KEY_LEN: usize = 80;

    /// Access level stamped into login tokens
    pub const LOGIN_TOKEN_ACCESS: u8 = 3;
}

/// Event actions emitted by the coordination core
pub mod actions {
    /// Node connectivity or power changed
    pub const NODE_CONNECT: &str = "nodeconnect";

    /// Server is shutting down
    pub const SERVER_STOPPED: &str = "stopped";
}

/// Event types (`etype`)
pub mod etypes {
    pub const NODE: &str = "node";
    pub const SERVER: &str = "server";
}

/// Markers on server-wide power records (`node = "*"`)
pub mod power_markers {
    /// Server started, every node's power is unknown from here on
    pub const SERVER_STARTED: u8 = 1;

    /// Server stopped
    pub const SERVER_STOPPED: u8 = 2;
}

/// Redis key names
pub mod redis_keys {
    /// Persisted events (JSON rows, newest first)
    pub const EVENTS: &str = "meshward:events";

    /// Power history records (JSON rows, newest first)
    pub const POWER: &str = "meshward:power";

    /// Hex-encoded login cookie key
    pub const LOGIN_COOKIE_KEY: &str = "meshward:login_cookie_key";

    /// Rows kept on each capped list
    pub const LIST_CAP: isize = 100_000;
}
