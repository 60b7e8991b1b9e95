//! Application configuration.
//!
//! Settings are read from the process environment (after loading an optional
//! `.env` file) into typed structs with defaults. Loosely typed per-user
//! configuration arriving over HTTP is validated separately by
//! [`AddonConfig`] before it reaches the core.

mod addon;
mod interval;

pub use addon::AddonConfig;
pub use interval::ScheduleInterval;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::http_client::DEFAULT_USER_AGENT;
use crate::{Error, Result};

/// Default bind address for the HTTP surface.
const DEFAULT_BIND: &str = "0.0.0.0:10000";

/// Playlist refresh every two hours.
const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Cached playlists are considered stale after twelve hours.
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Resolved stream URLs are reused for five minutes.
const DEFAULT_RESOLUTION_TTL: Duration = Duration::from_secs(300);

const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Placeholder substituted with the artifact path in validation arguments.
pub const ARTIFACT_PLACEHOLDER: &str = "{artifact}";

/// Retry and staleness policy of the playlist cache.
#[derive(Debug, Clone)]
pub struct PlaylistCacheConfig {
    /// Background refresh period.
    pub update_interval: Duration,
    /// Age after which an entry is flagged stale.
    pub max_age: Duration,
    /// Attempts per rebuild, including the first one.
    pub retry_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for PlaylistCacheConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            max_age: DEFAULT_MAX_AGE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Execution settings shared by both generator instances.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Directory holding installed artifacts.
    pub data_dir: PathBuf,
    /// Program used to run artifacts (`python3` by default).
    pub interpreter: String,
    /// Hard timeout for `execute`.
    pub execution_timeout: Duration,
    /// Hard timeout for `validate`.
    pub validation_timeout: Duration,
    /// Interpreter arguments for the playlist role's syntax check.
    /// `{artifact}` is replaced with the installed artifact path.
    pub syntax_check_args: Vec<String>,
    /// Interpreter arguments for the resolver role's self-test.
    pub self_test_args: Vec<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            interpreter: "python3".to_string(),
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
            syntax_check_args: ["-m", "py_compile", ARTIFACT_PLACEHOLDER]
                .map(String::from)
                .to_vec(),
            self_test_args: [ARTIFACT_PLACEHOLDER, "--check"].map(String::from).to_vec(),
        }
    }
}

/// Resolution cache settings.
#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    pub ttl: Duration,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_RESOLUTION_TTL,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub log_dir: PathBuf,
    /// Playlist to load at startup, if any.
    pub initial_playlist_url: Option<String>,
    pub user_agent: String,
    pub http_timeout: Duration,
    pub playlist: PlaylistCacheConfig,
    pub generator: GeneratorConfig,
    pub resolution: ResolutionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND.to_string(),
            log_dir: PathBuf::from("logs"),
            initial_playlist_url: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            playlist: PlaylistCacheConfig::default(),
            generator: GeneratorConfig::default(),
            resolution: ResolutionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, reading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unset or blank keys fall back to defaults; malformed values are
    /// rejected with [`Error::Configuration`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(bind) = get("TVCAST_BIND") {
            config.bind_address = bind;
        } else if let Some(port) = get("PORT") {
            let port: u16 = parse_value("PORT", &port)?;
            config.bind_address = format!("0.0.0.0:{port}");
        }

        if let Some(dir) = get("TVCAST_DATA_DIR") {
            config.generator.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("TVCAST_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(url) = get("TVCAST_PLAYLIST_URL") {
            url::Url::parse(&url)
                .map_err(|e| Error::config(format!("TVCAST_PLAYLIST_URL is not a URL: {e}")))?;
            config.initial_playlist_url = Some(url);
        }
        if let Some(agent) = get("TVCAST_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(interpreter) = get("TVCAST_PYTHON") {
            config.generator.interpreter = interpreter;
        }

        if let Some(v) = get("TVCAST_UPDATE_INTERVAL_SECS") {
            config.playlist.update_interval = secs("TVCAST_UPDATE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("TVCAST_MAX_AGE_SECS") {
            config.playlist.max_age = secs("TVCAST_MAX_AGE_SECS", &v)?;
        }
        if let Some(v) = get("TVCAST_RETRY_ATTEMPTS") {
            config.playlist.retry_attempts = parse_value("TVCAST_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("TVCAST_RETRY_DELAY_MS") {
            let ms: u64 = parse_value("TVCAST_RETRY_DELAY_MS", &v)?;
            config.playlist.retry_delay = Duration::from_millis(ms);
        }
        if let Some(v) = get("TVCAST_RESOLUTION_TTL_SECS") {
            config.resolution.ttl = secs("TVCAST_RESOLUTION_TTL_SECS", &v)?;
        }
        if let Some(v) = get("TVCAST_EXECUTION_TIMEOUT_SECS") {
            config.generator.execution_timeout = secs("TVCAST_EXECUTION_TIMEOUT_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.playlist.retry_attempts == 0 {
            return Err(Error::config("TVCAST_RETRY_ATTEMPTS must be at least 1"));
        }
        if self.playlist.update_interval.is_zero() {
            return Err(Error::config("TVCAST_UPDATE_INTERVAL_SECS must be positive"));
        }
        if self.generator.execution_timeout.is_zero() {
            return Err(Error::config("TVCAST_EXECUTION_TIMEOUT_SECS must be positive"));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::config(format!("{key}={raw:?}: {e}")))
}

fn secs(key: &str, raw: &str) -> Result<Duration> {
    parse_value::<u64>(key, raw).map(Duration::from_secs)
}
