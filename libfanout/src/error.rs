//! Error types for Fanout

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FanoutError>;

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl FanoutError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FanoutError::InvalidInput(_) | FanoutError::NotFound(_) => 3,
            FanoutError::Platform(PlatformError::Authentication(_)) => 2,
            FanoutError::Config(_) => 2,
            FanoutError::Platform(_) => 1,
            FanoutError::Database(_) => 1,
        }
    }

    /// Whether retrying the failed operation later can plausibly succeed.
    ///
    /// Database errors count as transient: a locked or briefly unavailable
    /// store is the common case for an orchestrator-level failure.
    pub fn is_transient(&self) -> bool {
        match self {
            FanoutError::Platform(e) => e.is_transient(),
            FanoutError::Database(DbError::Serialization(_)) => false,
            FanoutError::Database(DbError::MigrationError(_)) => false,
            FanoutError::Database(_) => true,
            FanoutError::Config(_) | FanoutError::InvalidInput(_) | FanoutError::NotFound(_) => {
                false
            }
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

    #[error("Stored value could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl PlatformError {
    /// Transient errors are worth another attempt; the rest are final for
    /// this platform in this attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Network(_) | PlatformError::RateLimit(_) | PlatformError::Timeout(_) => {
                true
            }
            PlatformError::Authentication(_)
            | PlatformError::Validation(_)
            | PlatformError::Posting(_)
            | PlatformError::NotSupported(_) => false,
        }
    }
}

impl From<sqlx::Error> for FanoutError {
    fn from(e: sqlx::Error) -> Self {
        FanoutError::Database(DbError::SqlxError(e))
    }
}

impl From<serde_json::Error> for FanoutError {
    fn from(e: serde_json::Error) -> Self {
        FanoutError::Database(DbError::Serialization(e))
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PlatformError::Timeout(e.to_string())
        } else if e.is_decode() {
            PlatformError::Posting(format!("Unexpected response body: {}", e))
        } else {
            PlatformError::Network(e.to_string())
        }
    }
}

impl From<reqwest::Error> for FanoutError {
    fn from(e: reqwest::Error) -> Self {
        FanoutError::Platform(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = FanoutError::InvalidInput("Empty platform set".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_not_found() {
        let error = FanoutError::NotFound("post abc".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = FanoutError::Platform(PlatformError::Authentication("expired".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = FanoutError::Config(ConfigError::MissingField("database.path".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_platform_errors() {
        for e in [
            PlatformError::Posting("x".to_string()),
            PlatformError::Network("x".to_string()),
            PlatformError::Validation("x".to_string()),
            PlatformError::RateLimit("x".to_string()),
            PlatformError::Timeout("x".to_string()),
        ] {
            assert_eq!(FanoutError::Platform(e).exit_code(), 1);
        }
    }

    #[test]
    fn test_error_message_formatting() {
        let error = FanoutError::Platform(PlatformError::Posting(
            "Facebook rejected the post".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Platform error: Posting failed: Facebook rejected the post"
        );

        let error = FanoutError::InvalidInput("platform set cannot be empty".to_string());
        assert_eq!(error.to_string(), "Invalid input: platform set cannot be empty");
    }

    #[test]
    fn test_transient_classification() {
        assert!(PlatformError::Network("reset".to_string()).is_transient());
        assert!(PlatformError::RateLimit("429".to_string()).is_transient());
        assert!(PlatformError::Timeout("30s".to_string()).is_transient());
        assert!(!PlatformError::Authentication("401".to_string()).is_transient());
        assert!(!PlatformError::Validation("400".to_string()).is_transient());
        assert!(!PlatformError::NotSupported("sync".to_string()).is_transient());
    }

    #[test]
    fn test_database_errors_are_transient_except_decoding() {
        let io = FanoutError::Database(DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk busy",
        )));
        assert!(io.is_transient());

        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let decode: FanoutError = bad_json.into();
        assert!(!decode.is_transient());
    }

    #[test]
    fn test_input_errors_are_not_transient() {
        assert!(!FanoutError::InvalidInput("x".to_string()).is_transient());
        assert!(!FanoutError::NotFound("x".to_string()).is_transient());
    }

    #[test]
    fn test_conversion_from_platform_error() {
        let error: FanoutError = PlatformError::Network("down".to_string()).into();
        assert!(matches!(error, FanoutError::Platform(PlatformError::Network(_))));
    }
}
