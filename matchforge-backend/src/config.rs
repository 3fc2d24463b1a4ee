use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;
use matchforge_engine::EngineConfig;

use crate::RateLimitConfig;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Directory holding the credential ledger (tokens.json)
    /// Env: TOKEN_FILE_LOCATION (default: ".")
    pub token_file_location: String,

    /// Shared secret every /api caller presents as a bearer token
    /// Env: CREDENTIAL (required to start the binary)
    pub credential: Option<String>,

    /// Lease lifetime without a heartbeat
    /// Env: SERVER_TTL_SECS (default: 60)
    pub server_ttl: Duration,

    /// Time a queued player has to confirm
    /// Env: PLAYER_TTL_SECS (default: 30)
    pub player_ttl: Duration,

    /// Interval of the expiry sweep
    /// Env: SWEEP_INTERVAL_MILLIS (default: 1000)
    pub sweep_interval: Duration,

    /// Rate limit for registration (requests per minute)
    /// Env: RATE_LIMIT_REGISTER_PER_MIN (default: 30)
    pub rate_limit_register_per_min: u64,

    /// Burst size for registration
    /// Env: RATE_LIMIT_REGISTER_BURST (default: 10)
    pub rate_limit_register_burst: u32,

    /// Rate limit for player endpoints (requests per second)
    /// Env: RATE_LIMIT_PLAYER_PER_SEC (default: 50)
    pub rate_limit_player_per_sec: u64,

    /// Burst size for player endpoints
    /// Env: RATE_LIMIT_PLAYER_BURST (default: 100)
    pub rate_limit_player_burst: u32,

    /// Rate limit for server and match upkeep (requests per second)
    /// Env: RATE_LIMIT_GENERAL_PER_SEC (default: 10)
    pub rate_limit_general_per_sec: u64,

    /// Burst size for server and match upkeep
    /// Env: RATE_LIMIT_GENERAL_BURST (default: 20)
    pub rate_limit_general_burst: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = EngineConfig::default();
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", 1024 * 1024),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            port: env_or_default("PORT", 3000),
            token_file_location: env_or_default_string("TOKEN_FILE_LOCATION", "."),
            credential: var("CREDENTIAL").ok(),
            server_ttl: Duration::from_secs(env_or_default(
                "SERVER_TTL_SECS",
                defaults.server_ttl.as_secs(),
            )),
            player_ttl: Duration::from_secs(env_or_default(
                "PLAYER_TTL_SECS",
                defaults.player_ttl.as_secs(),
            )),
            sweep_interval: Duration::from_millis(env_or_default(
                "SWEEP_INTERVAL_MILLIS",
                defaults.sweep_interval.as_millis() as u64,
            )),
            rate_limit_register_per_min: env_or_default("RATE_LIMIT_REGISTER_PER_MIN", 30),
            rate_limit_register_burst: env_or_default("RATE_LIMIT_REGISTER_BURST", 10),
            rate_limit_player_per_sec: env_or_default("RATE_LIMIT_PLAYER_PER_SEC", 50),
            rate_limit_player_burst: env_or_default("RATE_LIMIT_PLAYER_BURST", 100),
            rate_limit_general_per_sec: env_or_default("RATE_LIMIT_GENERAL_PER_SEC", 10),
            rate_limit_general_burst: env_or_default("RATE_LIMIT_GENERAL_BURST", 20),
        }
    }

    /// Create configuration with all default values
    pub fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            token_file_location: ".".to_string(),
            credential: None,
            server_ttl: defaults.server_ttl,
            player_ttl: defaults.player_ttl,
            sweep_interval: defaults.sweep_interval,
            rate_limit_register_per_min: 30,
            rate_limit_register_burst: 10,
            rate_limit_player_per_sec: 50,
            rate_limit_player_burst: 100,
            rate_limit_general_per_sec: 10,
            rate_limit_general_burst: 20,
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            server_ttl: self.server_ttl,
            player_ttl: self.player_ttl,
            sweep_interval: self.sweep_interval,
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            register_per_min: self.rate_limit_register_per_min,
            register_burst: self.rate_limit_register_burst,
            player_per_sec: self.rate_limit_player_per_sec,
            player_burst: self.rate_limit_player_burst,
            general_per_sec: self.rate_limit_general_per_sec,
            general_burst: self.rate_limit_general_burst,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
