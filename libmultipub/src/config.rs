//! Configuration management for Multipub

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::types::PlatformKind;

/// Longest allowed scheduler tick; timed jobs must not drift further than this
pub const MAX_TICK_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub poller: PollerConfig,
    /// Per-platform posting budgets keyed by platform name
    pub rate_limits: HashMap<String, RateLimitConfig>,
    pub constraints: ConstraintsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/multipub/publish.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of targets executing at once
    pub workers: usize,
    pub tick_interval_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Retries for a single failed chunk before the session aborts
    pub chunk_retry_limit: u32,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            tick_interval_ms: 1_000,
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_cap_ms: 60_000,
            chunk_retry_limit: 3,
            event_capacity: 100,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Interval overrides keyed by platform name
    pub platform_intervals: HashMap<String, u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            timeout_secs: 600,
            platform_intervals: HashMap::new(),
        }
    }
}

impl PollerConfig {
    pub fn interval_for(&self, platform: PlatformKind) -> Duration {
        let secs = self
            .platform_intervals
            .get(platform.as_str())
            .copied()
            .unwrap_or(self.interval_secs);
        Duration::from_secs(secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub posts_per_hour: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintsConfig {
    /// Replaces the built-in constraint table when set
    pub path: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.workers == 0 {
            return Err(invalid("engine.workers", "must be at least 1"));
        }
        if self.engine.tick_interval_ms == 0 || self.engine.tick_interval_ms > MAX_TICK_INTERVAL_MS
        {
            return Err(invalid(
                "engine.tick_interval_ms",
                &format!("must be between 1 and {}", MAX_TICK_INTERVAL_MS),
            ));
        }
        if self.engine.max_attempts == 0 {
            return Err(invalid("engine.max_attempts", "must be at least 1"));
        }
        if self.engine.backoff_base_ms > self.engine.backoff_cap_ms {
            return Err(invalid(
                "engine.backoff_base_ms",
                "must not exceed engine.backoff_cap_ms",
            ));
        }
        if self.engine.event_capacity == 0 {
            return Err(invalid("engine.event_capacity", "must be at least 1"));
        }
        if self.poller.interval_secs == 0 {
            return Err(invalid("poller.interval_secs", "must be at least 1"));
        }
        if self.poller.timeout_secs == 0 {
            return Err(invalid("poller.timeout_secs", "must be at least 1"));
        }
        for name in self
            .rate_limits
            .keys()
            .chain(self.poller.platform_intervals.keys())
        {
            name.parse::<PlatformKind>().map_err(|_| {
                ConfigError::InvalidValue {
                    field: name.clone(),
                    reason: "unknown platform".to_string(),
                }
            })?;
        }
        Ok(())
    }

    /// Posting budgets keyed by platform
    pub fn rate_limits(&self) -> HashMap<PlatformKind, u32> {
        self.rate_limits
            .iter()
            .filter_map(|(name, limit)| {
                name.parse::<PlatformKind>()
                    .ok()
                    .map(|p| (p, limit.posts_per_hour))
            })
            .collect()
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::MultipubError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("MULTIPUB_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("multipub").join("config.toml"))
}
