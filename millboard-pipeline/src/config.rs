use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const CACHE_TTL_MS: u64 = 300_000;
pub const REFRESH_PERIOD_MS: u64 = 300_000;

/// Tunables for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub refresh_period: Duration,
    pub request_timeout: Duration,
    /// Pause between the ETL completion signal and the first refresh, so
    /// the backend has finished writing its outputs.
    pub settle_delay: Duration,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            cache_dir: PathBuf::from(".millboard-cache"),
            cache_ttl: Duration::from_millis(CACHE_TTL_MS),
            refresh_period: Duration::from_millis(REFRESH_PERIOD_MS),
            request_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
            default_page_size: 10,
            max_page_size: 200,
        }
    }
}

fn env_string(name: &str, default: String) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_u64(name, default.as_millis() as u64))
}

impl SyncConfig {
    /// Defaults overridden by `MILLBOARD_*` environment variables.
    /// Unparseable values keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cfg = Self {
            api_base_url: env_string("MILLBOARD_API_BASE_URL", defaults.api_base_url),
            cache_dir: PathBuf::from(env_string(
                "MILLBOARD_CACHE_DIR",
                defaults.cache_dir.display().to_string(),
            )),
            cache_ttl: env_duration_ms("MILLBOARD_CACHE_TTL_MS", defaults.cache_ttl),
            refresh_period: env_duration_ms("MILLBOARD_REFRESH_PERIOD_MS", defaults.refresh_period),
            request_timeout: env_duration_ms("MILLBOARD_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            settle_delay: env_duration_ms("MILLBOARD_SETTLE_DELAY_MS", defaults.settle_delay),
            default_page_size: env_usize("MILLBOARD_DEFAULT_PAGE_SIZE", defaults.default_page_size),
            max_page_size: env_usize("MILLBOARD_MAX_PAGE_SIZE", defaults.max_page_size),
        };
        cfg.normalized()
    }

    /// Keep page sizes usable (at least 1, default within max) and the
    /// refresh period non-zero.
    pub fn normalized(mut self) -> Self {
        self.refresh_period = self.refresh_period.max(Duration::from_secs(1));
        self.max_page_size = self.max_page_size.max(1);
        self.default_page_size = self.default_page_size.clamp(1, self.max_page_size);
        self
    }

    /// Clamp a requested page size to `1..=max_page_size`; 0 means default.
    pub fn page_size(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_page_size
        } else {
            requested.min(self.max_page_size)
        }
    }
}
