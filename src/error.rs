use thiserror::Error;

/// Result type for rate limit operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors that can occur in the rate limiter
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Store timeout: {0}")]
    Timeout(String),

    #[error("Store not connected")]
    NotConnected,

    #[error("Store error: {0}")]
    Store(String),
}

impl RateLimitError {
    /// Label used when recording this error against the store error counter
    pub fn store_error_kind(&self) -> &'static str {
        match self {
            RateLimitError::Timeout(_) => "timeout",
            RateLimitError::NotConnected => "disconnected",
            _ => "operation",
        }
    }
}
