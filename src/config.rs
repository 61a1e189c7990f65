use ::config::{Config, Environment, File};
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use crate::{
    error::{RateLimitError, Result},
    redis::RedisConfig,
};

/// Top-level service settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub redis: RedisSettings,

    #[serde(default)]
    pub limiter: LimiterSettings,

    #[serde(default)]
    pub gate: GateSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

/// Connection settings for the shared Redis store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    pub connection_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout_ms: 5000,
            command_timeout_ms: 1000,
        }
    }
}

impl RedisSettings {
    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.url.clone(),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        }
    }
}

/// Sliding window parameters and store failure handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    pub window_secs: u64,
    pub max_requests: u64,
    pub key_prefix: String,
    pub operation_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_interval_secs: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 100,
            key_prefix: "rate_limit".to_string(),
            operation_timeout_ms: 1000,
            connect_timeout_ms: 5000,
            reconnect_interval_secs: 5,
        }
    }
}

impl LimiterSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

/// How the gate derives a caller identifier from a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub identifier_header: String,
    pub fallback_identifier: String,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            identifier_header: "x-forwarded-for".to_string(),
            fallback_identifier: "unknown".to_string(),
        }
    }
}

impl GateSettings {
    pub fn header_name(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.identifier_header.as_bytes()).map_err(|e| {
            RateLimitError::Config(format!(
                "Invalid identifier header '{}': {}",
                self.identifier_header, e
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub http_addr: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Settings {
    /// Load settings from an optional YAML file, then
    /// `RATELIMIT_<SECTION>__<KEY>` environment variables (for example
    /// `RATELIMIT_LIMITER__MAX_REQUESTS`), then `REDIS_URL`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("RATELIMIT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| RateLimitError::Config(format!("Failed to parse YAML: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limiter.window_secs == 0 {
            return Err(RateLimitError::Config(
                "limiter.window_secs must be greater than zero".to_string(),
            ));
        }
        if self.limiter.max_requests == 0 {
            return Err(RateLimitError::Config(
                "limiter.max_requests must be greater than zero".to_string(),
            ));
        }
        if self.limiter.key_prefix.is_empty() {
            return Err(RateLimitError::Config(
                "limiter.key_prefix must not be empty".to_string(),
            ));
        }
        if self.gate.fallback_identifier.is_empty() {
            return Err(RateLimitError::Config(
                "gate.fallback_identifier must not be empty".to_string(),
            ));
        }
        self.gate.header_name()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.redis.url, "redis://localhost:6379");
        assert_eq!(settings.limiter.window_secs, 60);
        assert_eq!(settings.limiter.max_requests, 100);
        assert_eq!(settings.limiter.key_prefix, "rate_limit");
        assert_eq!(settings.gate.identifier_header, "x-forwarded-for");
        assert_eq!(settings.gate.fallback_identifier, "unknown");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_settings_from_yaml() {
        let yaml = r#"
redis:
  url: redis://cache:6379
  command_timeout_ms: 250
limiter:
  window_secs: 10
  max_requests: 5
gate:
  identifier_header: x-real-ip
"#;

        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.redis.url, "redis://cache:6379");
        assert_eq!(settings.redis.connection_timeout_ms, 5000);

        let redis_config = settings.redis.redis_config();
        assert_eq!(redis_config.command_timeout, Duration::from_millis(250));

        assert_eq!(settings.limiter.window_secs, 10);
        assert_eq!(settings.limiter.max_requests, 5);
        assert_eq!(settings.limiter.key_prefix, "rate_limit");
        assert_eq!(settings.gate.header_name().unwrap(), "x-real-ip");
        assert_eq!(settings.gate.fallback_identifier, "unknown");
    }

    #[test]
    fn test_rejects_zero_budget() {
        let yaml = r#"
limiter:
  max_requests: 0
"#;
        let result = Settings::from_yaml(yaml);
        match result {
            Err(RateLimitError::Config(msg)) => assert!(msg.contains("max_requests")),
            other => panic!("Expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_window() {
        let mut settings = Settings::default();
        settings.limiter.window_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_invalid_header() {
        let mut settings = Settings::default();
        settings.gate.identifier_header = "not a header".to_string();
        assert!(matches!(
            settings.validate(),
            Err(RateLimitError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        assert!(Settings::from_yaml("limiter: [").is_err());
    }

    #[test]
    fn test_load_reads_section_env_vars() {
        std::env::set_var("RATELIMIT_LIMITER__MAX_REQUESTS", "42");
        let loaded = Settings::load(None);
        std::env::remove_var("RATELIMIT_LIMITER__MAX_REQUESTS");

        let settings = loaded.unwrap();
        assert_eq!(settings.limiter.max_requests, 42);
        assert_eq!(settings.limiter.window_secs, 60);
    }
}
