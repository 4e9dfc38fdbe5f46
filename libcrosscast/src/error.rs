//! Error types for Crosscast

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Platform;

pub type Result<T> = std::result::Result<T, CrosscastError>;

#[derive(Error, Debug)]
pub enum CrosscastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No active connection for: {}", join_platforms(.0))]
    ConnectionMissing(Vec<Platform>),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CrosscastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosscastError::InvalidInput(_)
            | CrosscastError::Validation(_)
            | CrosscastError::NotFound(_) => 3,
            CrosscastError::ConnectionMissing(_) => 2,
            CrosscastError::Platform(PlatformError::Authentication(_)) => 2,
            CrosscastError::Platform(_) => 1,
            CrosscastError::Conflict(_) => 1,
            CrosscastError::Config(_) => 1,
            CrosscastError::Database(_) => 1,
        }
    }
}

fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
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

    #[error("Corrupt column data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown {kind} value stored: {value}")]
    UnknownValue { kind: &'static str, value: String },
}

/// A single offending input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every field that failed validation, in the order they were checked
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[error("{}", join_fields(.fields))]
pub struct ValidationErrors {
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether `field` is among the offending fields
    pub fn has(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }

    /// `Ok(())` when nothing was recorded, otherwise the collected errors
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CrosscastError::Validation(self))
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised at the adapter boundary
///
/// These never escape the dispatch layer: they are folded into a
/// [`PlatformResult`](crate::types::PlatformResult) via [`PlatformError::code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content rejected by platform: {0}")]
    ContentRejected(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Platform server error: {0}")]
    Server(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Unexpected adapter failure: {0}")]
    Unexpected(String),
}

impl PlatformError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PlatformError::Authentication(_) => ErrorCode::AuthFailed,
            PlatformError::ContentRejected(_) => ErrorCode::ContentRejected,
            PlatformError::InvalidPayload(_) => ErrorCode::InvalidPayload,
            PlatformError::Network(_) => ErrorCode::Network,
            PlatformError::Timeout(_) => ErrorCode::Timeout,
            PlatformError::RateLimit(_) => ErrorCode::RateLimited,
            PlatformError::Server(_) => ErrorCode::ServerError,
            PlatformError::SessionExpired(_) => ErrorCode::SessionExpired,
            PlatformError::NotConnected(_) => ErrorCode::NotConnected,
            PlatformError::NotSupported(_) => ErrorCode::NotSupported,
            PlatformError::Unexpected(_) => ErrorCode::Unexpected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// Stable, persisted failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthFailed,
    ContentRejected,
    InvalidPayload,
    Network,
    Timeout,
    RateLimited,
    ServerError,
    SessionExpired,
    NotConnected,
    NotSupported,
    Unexpected,
}

impl ErrorCode {
    /// Transient failures (network, timeout, rate limit, 5xx, first session expiry)
    /// may be retried; everything else fails the item immediately.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Network
                | ErrorCode::Timeout
                | ErrorCode::RateLimited
                | ErrorCode::ServerError
                | ErrorCode::SessionExpired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::ContentRejected => "content_rejected",
            ErrorCode::InvalidPayload => "invalid_payload",
            ErrorCode::Network => "network",
            ErrorCode::Timeout => "timeout",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::ServerError => "server_error",
            ErrorCode::SessionExpired => "session_expired",
            ErrorCode::NotConnected => "not_connected",
            ErrorCode::NotSupported => "not_supported",
            ErrorCode::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = CrosscastError::InvalidInput("bad owner".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_validation() {
        let error = CrosscastError::Validation(ValidationErrors::single("title", "empty"));
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_connection_missing() {
        let error = CrosscastError::ConnectionMissing(vec![Platform::Instagram]);
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = CrosscastError::Platform(PlatformError::Authentication("expired".into()));
        assert_eq!(error.exit_code(), 2);

        let error = CrosscastError::Platform(PlatformError::Network("refused".into()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_connection_missing_lists_every_platform() {
        let error =
            CrosscastError::ConnectionMissing(vec![Platform::Instagram, Platform::Mercari]);
        assert_eq!(
            error.to_string(),
            "No active connection for: instagram, mercari"
        );
    }

    #[test]
    fn test_validation_errors_enumerate_all_fields() {
        let mut errors = ValidationErrors::new();
        errors.add("title", "must not be empty");
        errors.add("hashtags", "at most 30 allowed");

        assert!(errors.has("title"));
        assert!(errors.has("hashtags"));
        assert!(!errors.has("description"));

        let message = CrosscastError::Validation(errors).to_string();
        assert_eq!(
            message,
            "Validation failed: title: must not be empty; hashtags: at most 30 allowed"
        );
    }

    #[test]
    fn test_empty_validation_errors_into_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
        assert!(ValidationErrors::single("priority", "out of range")
            .into_result()
            .is_err());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PlatformError::Network("reset".into()).is_retryable());
        assert!(PlatformError::Timeout("30s".into()).is_retryable());
        assert!(PlatformError::RateLimit("429".into()).is_retryable());
        assert!(PlatformError::Server("502".into()).is_retryable());
        assert!(PlatformError::SessionExpired("cookie gone".into()).is_retryable());

        assert!(!PlatformError::Authentication("revoked".into()).is_retryable());
        assert!(!PlatformError::ContentRejected("policy".into()).is_retryable());
        assert!(!PlatformError::InvalidPayload("no image".into()).is_retryable());
        assert!(!PlatformError::NotConnected("none".into()).is_retryable());
        assert!(!PlatformError::Unexpected("panic".into()).is_retryable());
    }

    #[test]
    fn test_error_code_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCode::RateLimited).unwrap();
        assert_eq!(json, r#""rate_limited""#);
        assert_eq!(ErrorCode::SessionExpired.to_string(), "session_expired");
    }

    #[test]
    fn test_error_conversion_from_platform_error() {
        let error: CrosscastError = PlatformError::Server("503".to_string()).into();
        assert!(matches!(error, CrosscastError::Platform(_)));
        assert_eq!(error.to_string(), "Platform error: Platform server error: 503");
    }

    #[test]
    fn test_error_conversion_from_db_error() {
        let db_error = DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "test",
        ));
        let error: CrosscastError = db_error.into();
        assert!(matches!(error, CrosscastError::Database(_)));
    }
}
