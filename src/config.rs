//! Application-level configuration loading: tracking, persistence retry, presence feed
//! and SSE settings from a JSON file, plus the store backend choice from the environment.

use std::{
    collections::HashSet, env, fmt, fs, io::ErrorKind, path::PathBuf, str::FromStr,
    time::Duration,
};

use rand::{Rng, distr::Alphanumeric};
use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    dao::models::ChannelId,
    services::{retry::RetryPolicy, tracker::TrackerSettings},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "VOICE_LEDGER_CONFIG_PATH";
/// Environment variable holding the operator token.
const ADMIN_TOKEN_ENV: &str = "ADMIN_TOKEN";
const GENERATED_TOKEN_LEN: usize = 32;
/// Environment variable selecting the durable store.
const STORE_BACKEND_ENV: &str = "STORE_BACKEND";

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_FEED_GRACE: Duration = Duration::from_secs(30);
const DEFAULT_SSE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub tracking: TrackingConfig,
    pub retry: RetryPolicy,
    pub feed: FeedConfig,
    pub sse_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingConfig {
    pub flush_interval: Duration,
    /// Channels that never count as tracked presence (e.g. an AFK or "paused" room).
    pub excluded_channels: HashSet<ChannelId>,
    pub ignore_bots: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    /// How long every presence feed may stay disconnected before it counts as lost.
    pub grace_period: Duration,
    /// Stop the process on feed loss; otherwise only drain open sessions.
    pub shutdown_on_loss: bool,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        flush_interval_secs = app_config.tracking.flush_interval.as_secs(),
                        excluded_channels = app_config.tracking.excluded_channels.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            flush_interval: self.tracking.flush_interval,
            retry: self.retry,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    tracking: RawTracking,
    persistence: RawPersistence,
    feed: RawFeed,
    sse: RawSse,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawTracking {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "flush_interval_secs")]
    flush_interval: Duration,
    excluded_channels: Vec<ChannelId>,
    ignore_bots: bool,
}

impl Default for RawTracking {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            excluded_channels: Vec::new(),
            ignore_bots: true,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawPersistence {
    max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "base_delay_ms")]
    base_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_delay_ms")]
    max_delay: Duration,
    jitter: bool,
    /// `0` disables the per-attempt timeout.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "call_timeout_ms")]
    call_timeout: Duration,
}

impl Default for RawPersistence {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            jitter: policy.jitter,
            call_timeout: policy.call_timeout.unwrap_or_default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawFeed {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "grace_period_secs")]
    grace_period: Duration,
    shutdown_on_loss: bool,
}

impl Default for RawFeed {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_FEED_GRACE,
            shutdown_on_loss: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSse {
    capacity: usize,
}

impl Default for RawSse {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SSE_CAPACITY,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let flush_interval = if value.tracking.flush_interval.is_zero() {
            warn!("flush interval must be positive; using the default");
            DEFAULT_FLUSH_INTERVAL
        } else {
            value.tracking.flush_interval
        };

        let persistence = value.persistence;
        let retry = RetryPolicy {
            max_attempts: persistence.max_attempts.max(1),
            base_delay: persistence.base_delay,
            max_delay: persistence.max_delay.max(persistence.base_delay),
            jitter: persistence.jitter,
            call_timeout: (!persistence.call_timeout.is_zero()).then_some(persistence.call_timeout),
        };

        Self {
            tracking: TrackingConfig {
                flush_interval,
                excluded_channels: value.tracking.excluded_channels.into_iter().collect(),
                ignore_bots: value.tracking.ignore_bots,
            },
            retry,
            feed: FeedConfig {
                grace_period: value.feed.grace_period,
                shutdown_on_loss: value.feed.shutdown_on_loss,
            },
            sse_capacity: value.sse.capacity.max(1),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Durable store selected through `STORE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Couch,
    Memory,
}

/// Errors raised while reading environment-level settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown store backend `{0}` (expected mongo, couch or memory)")]
    UnknownBackend(String),
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "couch" | "couchdb" => Ok(Self::Couch),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl StoreBackend {
    /// Read `STORE_BACKEND`, defaulting to MongoDB.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(STORE_BACKEND_ENV) {
            Ok(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(Self::Mongo),
        }
    }
}

/// Operator token guarding the admin routes, the SSE stream and the presence feed.
#[derive(Clone, PartialEq, Eq)]
pub enum AdminToken {
    /// Taken from `ADMIN_TOKEN`.
    Configured(String),
    /// Random token for this run, used when `ADMIN_TOKEN` is unset or blank.
    Generated(String),
}

impl AdminToken {
    /// Read `ADMIN_TOKEN`, generating a random token when it is missing.
    pub fn from_env() -> Self {
        Self::resolve(env::var(ADMIN_TOKEN_ENV).ok())
    }

    fn resolve(configured: Option<String>) -> Self {
        match configured {
            Some(token) if !token.trim().is_empty() => Self::Configured(token),
            _ => Self::Generated(
                rand::rng()
                    .sample_iter(&Alphanumeric)
                    .take(GENERATED_TOKEN_LEN)
                    .map(char::from)
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured(_) => f.write_str("AdminToken::Configured(<redacted>)"),
            Self::Generated(_) => f.write_str("AdminToken::Generated(<redacted>)"),
        }
    }
}
