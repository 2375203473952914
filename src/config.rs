use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::access::FallbackPolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub drive_api_key: Option<String>,
    pub drive_api_base: String,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub oauth_redirect_uri: Option<String>,
    pub oauth_token_url: String,
    pub data_dir: Option<String>,
    pub snapshot_interval_secs: u64,
    pub listing_timeout_ms: u64,
    pub detail_timeout_ms: u64,
    pub path_hop_timeout_ms: u64,
    pub identity_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub breadcrumb_max_depth: usize,
    pub fallback_policy: FallbackPolicy,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_env("PORT", 8080),
            drive_api_key: optional_env("DRIVE_API_KEY"),
            drive_api_base: env::var("DRIVE_API_BASE")
                .unwrap_or_else(|_| "https://www.googleapis.com/drive/v3".into()),
            oauth_client_id: optional_env("OAUTH_CLIENT_ID"),
            oauth_client_secret: optional_env("OAUTH_CLIENT_SECRET"),
            oauth_redirect_uri: optional_env("OAUTH_REDIRECT_URI"),
            oauth_token_url: env::var("OAUTH_TOKEN_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".into()),
            data_dir: optional_env("DATA_DIR"),
            snapshot_interval_secs: parse_env("SNAPSHOT_INTERVAL_SECS", 300),
            listing_timeout_ms: parse_env("LISTING_TIMEOUT_MS", 10_000),
            detail_timeout_ms: parse_env("DETAIL_TIMEOUT_MS", 5_000),
            path_hop_timeout_ms: parse_env("PATH_HOP_TIMEOUT_MS", 3_000),
            identity_timeout_ms: parse_env("IDENTITY_TIMEOUT_MS", 5_000),
            cache_ttl_secs: parse_env("CACHE_TTL_SECS", 300),
            breadcrumb_max_depth: parse_env("BREADCRUMB_MAX_DEPTH", 5),
            fallback_policy: parse_env("FALLBACK_POLICY", FallbackPolicy::AnyError),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    /// Directory of the durable identity backend, if one is configured.
    pub fn identity_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| PathBuf::from(dir).join("identity"))
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.identity_dir().map(|dir| dir.join("snapshot.bin"))
    }

    pub fn journal_dir(&self) -> Option<PathBuf> {
        self.identity_dir().map(|dir| dir.join("journal"))
    }

    pub fn listing_timeout(&self) -> Duration {
        Duration::from_millis(self.listing_timeout_ms)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_millis(self.detail_timeout_ms)
    }

    pub fn path_hop_timeout(&self) -> Duration {
        Duration::from_millis(self.path_hop_timeout_ms)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
