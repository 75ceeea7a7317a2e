//! Error types for Multipub

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::ValidationError;

pub type Result<T> = std::result::Result<T, MultipubError>;

#[derive(Error, Debug)]
pub enum MultipubError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid transition for target {target_id}: {from} -> {to}")]
    InvalidTransition {
        target_id: String,
        from: String,
        to: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MultipubError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            MultipubError::InvalidInput(_) | MultipubError::Validation(_) => 3,
            MultipubError::Config(_)
            | MultipubError::Database(_)
            | MultipubError::NotFound(_)
            | MultipubError::InvalidState(_)
            | MultipubError::InvalidTransition { .. } => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Failure category recorded on a publish target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transient,
    Permanent,
    AuthExpired,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validation" => Some(ErrorKind::Validation),
            "transient" => Some(ErrorKind::Transient),
            "permanent" => Some(ErrorKind::Permanent),
            "auth_expired" => Some(ErrorKind::AuthExpired),
            "timeout" => Some(ErrorKind::Timeout),
            "cancelled" => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by platform uploaders and other external collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Transient platform error: {0}")]
    Transient(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Platform rejected the request: {0}")]
    Permanent(String),

    #[error("Authentication expired: {0}")]
    AuthExpired(String),
}

impl UploadError {
    /// Classify an HTTP status returned by a platform API
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = format!("HTTP {}: {}", status, message.into());
        match status {
            429 => UploadError::RateLimited(message),
            401 | 403 => UploadError::AuthExpired(message),
            500..=599 => UploadError::Transient(message),
            _ => UploadError::Permanent(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Transient(_) | UploadError::RateLimited(_) => ErrorKind::Transient,
            UploadError::Permanent(_) => ErrorKind::Permanent,
            UploadError::AuthExpired(_) => ErrorKind::AuthExpired,
        }
    }

    /// Network failures, 5xx and rate-limit signals are worth another attempt
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
