//! Bridge and lookup settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{LOOKUP_BATCH_SIZE, MAX_TARGETS_PER_JOB, SESSION_LIMITER_CAPACITY};

/// Settings for the per-user connection lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Root directory holding one credential directory per user.
    #[serde(default = "default_auth_root")]
    pub auth_root: PathBuf,

    /// Path to the JSON user store file.
    #[serde(default = "default_user_store_path")]
    pub user_store_path: PathBuf,

    /// Custom pairing code to request from the transport, if any.
    #[serde(default)]
    pub custom_pairing_code: Option<String>,

    /// Delay before a reconnect attempt after a non-logout close.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Warm-up wait after opening a fresh socket for pairing.
    #[serde(default = "default_pairing_warmup")]
    pub pairing_warmup_secs: u64,

    /// Country code prefixed to local numbers during normalization.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
}

fn default_auth_root() -> PathBuf {
    PathBuf::from("auth")
}

fn default_user_store_path() -> PathBuf {
    PathBuf::from("users.json")
}

fn default_reconnect_delay() -> u64 {
    3
}

fn default_pairing_warmup() -> u64 {
    8
}

fn default_country_code() -> String {
    "62".to_owned()
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            auth_root: default_auth_root(),
            user_store_path: default_user_store_path(),
            custom_pairing_code: None,
            reconnect_delay_secs: default_reconnect_delay(),
            pairing_warmup_secs: default_pairing_warmup(),
            default_country_code: default_country_code(),
        }
    }
}

impl BridgeSettings {
    /// Creates bridge settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            auth_root: std::env::var("WA_AUTH_ROOT")
                .map_or_else(|_| default_auth_root(), PathBuf::from),
            user_store_path: std::env::var("WA_USER_STORE")
                .map_or_else(|_| default_user_store_path(), PathBuf::from),
            custom_pairing_code: std::env::var("WA_PAIRING_CODE").ok(),
            reconnect_delay_secs: std::env::var("WA_RECONNECT_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_reconnect_delay),
            pairing_warmup_secs: std::env::var("WA_PAIRING_WARMUP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_pairing_warmup),
            default_country_code: std::env::var("WA_DEFAULT_COUNTRY_CODE")
                .unwrap_or_else(|_| default_country_code()),
        }
    }

    /// Reconnect delay as a [`Duration`].
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Pairing warm-up wait as a [`Duration`].
    #[must_use]
    pub const fn pairing_warmup(&self) -> Duration {
        Duration::from_secs(self.pairing_warmup_secs)
    }
}

/// Settings for the bulk lookup orchestrator and its rate control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupSettings {
    /// Targets per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Cap on targets processed per invocation.
    #[serde(default = "default_max_targets")]
    pub max_targets: usize,

    /// Minimum spacing between dispatched lookups within a batch.
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_ms: u64,

    /// Cooldown between batches.
    #[serde(default = "default_batch_cooldown")]
    pub batch_cooldown_ms: u64,

    /// Per-user concurrency limiter capacity.
    #[serde(default = "default_limiter_capacity")]
    pub limiter_capacity: usize,

    /// Lower bound for the adaptive request rate (requests/sec).
    #[serde(default = "default_min_rate")]
    pub min_rate: u32,

    /// Upper bound for the adaptive request rate (requests/sec).
    #[serde(default = "default_max_rate")]
    pub max_rate: u32,

    /// Base delay multiplied by the backoff factor when throttled.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
}

fn default_batch_size() -> usize {
    LOOKUP_BATCH_SIZE
}

fn default_max_targets() -> usize {
    MAX_TARGETS_PER_JOB
}

fn default_dispatch_interval() -> u64 {
    200
}

fn default_batch_cooldown() -> u64 {
    500
}

fn default_limiter_capacity() -> usize {
    SESSION_LIMITER_CAPACITY
}

fn default_min_rate() -> u32 {
    3
}

fn default_max_rate() -> u32 {
    10
}

fn default_base_backoff() -> u64 {
    100
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_targets: default_max_targets(),
            dispatch_interval_ms: default_dispatch_interval(),
            batch_cooldown_ms: default_batch_cooldown(),
            limiter_capacity: default_limiter_capacity(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
            base_backoff_ms: default_base_backoff(),
        }
    }
}

impl LookupSettings {
    /// Creates lookup settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_parse("WA_LOOKUP_BATCH_SIZE", defaults.batch_size),
            max_targets: env_parse("WA_LOOKUP_MAX_TARGETS", defaults.max_targets),
            dispatch_interval_ms: env_parse(
                "WA_LOOKUP_DISPATCH_INTERVAL_MS",
                defaults.dispatch_interval_ms,
            ),
            batch_cooldown_ms: env_parse("WA_LOOKUP_BATCH_COOLDOWN_MS", defaults.batch_cooldown_ms),
            limiter_capacity: env_parse("WA_LOOKUP_LIMITER_CAPACITY", defaults.limiter_capacity),
            min_rate: env_parse("WA_LOOKUP_MIN_RATE", defaults.min_rate),
            max_rate: env_parse("WA_LOOKUP_MAX_RATE", defaults.max_rate),
            base_backoff_ms: env_parse("WA_LOOKUP_BASE_BACKOFF_MS", defaults.base_backoff_ms),
        }
    }

    /// Minimum spacing between dispatched lookups.
    #[must_use]
    pub const fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    /// Cooldown between batches.
    #[must_use]
    pub const fn batch_cooldown(&self) -> Duration {
        Duration::from_millis(self.batch_cooldown_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bridge_settings() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.reconnect_delay_secs, 3);
        assert_eq!(settings.pairing_warmup_secs, 8);
        assert_eq!(settings.default_country_code, "62");
        assert!(settings.custom_pairing_code.is_none());
    }

    #[test]
    fn test_default_lookup_settings() {
        let settings = LookupSettings::default();
        assert_eq!(settings.batch_size, 20);
        assert_eq!(settings.max_targets, 500);
        assert_eq!(settings.min_rate, 3);
        assert_eq!(settings.max_rate, 10);
        assert_eq!(settings.dispatch_interval(), Duration::from_millis(200));
        assert_eq!(settings.batch_cooldown(), Duration::from_millis(500));
    }
}
