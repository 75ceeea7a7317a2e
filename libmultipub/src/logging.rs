//! Logging setup shared by the engine and the Multipub binaries
//!
//! The format and level come from `MULTIPUB_LOG_FORMAT` / `MULTIPUB_LOG_LEVEL`
//! unless set explicitly; `RUST_LOG` still overrides the level filter.
//!
//! ```no_run
//! use libmultipub::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::from_env("info").format(LogFormat::Json).init();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

pub const FORMAT_ENV: &str = "MULTIPUB_LOG_FORMAT";
pub const LEVEL_ENV: &str = "MULTIPUB_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain lines on stderr
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
    /// Multi-line colored output with source locations
    Pretty,
}

impl LogFormat {
    pub const ALL: [LogFormat; 3] = [LogFormat::Text, LogFormat::Json, LogFormat::Pretty];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "Unknown log format '{}'; expected one of: text, json, pretty",
                    s
                )
            })
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    /// Forces `debug` unless `RUST_LOG` is set
    pub verbose: bool,
}

impl LoggingConfig {
    /// Settings from the environment, `default_level` when no level is set
    ///
    /// An unparsable format falls back to text rather than failing startup.
    pub fn from_env(default_level: &str) -> Self {
        let format = std::env::var(FORMAT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let level = std::env::var(LEVEL_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default_level.to_string());

        Self {
            format,
            level,
            verbose: false,
        }
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn filter(&self) -> EnvFilter {
        let level = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }

    /// Install the global subscriber; returns false if one was already installed
    pub fn init(&self) -> bool {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr);

        let installed = match self.format {
            LogFormat::Text => builder.with_target(false).try_init(),
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => builder
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .try_init(),
        };
        installed.is_ok()
    }
}

/// Initialise logging from the environment at `info`
pub fn init_default() -> bool {
    LoggingConfig::from_env("info").init()
}
