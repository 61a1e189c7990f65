use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    error::{RateLimitError, Result},
    store::{StoreConnector, WindowStore},
    utils::window_start,
};

/// Redis client configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
        }
    }
}

/// Redis client wrapper for sliding window operations
#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
    config: RedisConfig,
}

impl RedisClient {
    /// Create a new Redis client and verify it with PING
    pub async fn new(config: RedisConfig) -> Result<Self> {
        info!("Creating Redis client for URL: {}", config.url);

        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            RateLimitError::Redis(e)
        })?;

        let connection_result =
            tokio::time::timeout(config.connection_timeout, client.get_connection_manager()).await;

        let connection = match connection_result {
            Ok(Ok(conn)) => {
                debug!("Connection manager established");
                conn
            }
            Ok(Err(e)) => {
                warn!("Failed to create connection manager: {}", e);
                return Err(RateLimitError::Redis(e));
            }
            Err(_) => {
                warn!(
                    "Timeout while creating connection manager ({}ms)",
                    config.connection_timeout.as_millis()
                );
                return Err(RateLimitError::Timeout(
                    "Timeout while creating Redis connection manager".to_string(),
                ));
            }
        };

        let client = Self { connection, config };
        client.ping().await?;

        info!("Redis client initialized successfully");
        Ok(client)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let ping_result = tokio::time::timeout(
            self.config.command_timeout,
            redis::cmd("PING").query_async::<_, ()>(&mut conn),
        )
        .await;

        match ping_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Redis PING failed: {}", e);
                Err(RateLimitError::Redis(e))
            }
            Err(_) => {
                warn!(
                    "Redis PING timeout ({}ms)",
                    self.config.command_timeout.as_millis()
                );
                Err(RateLimitError::Timeout(
                    "Timeout while testing Redis connection".to_string(),
                ))
            }
        }
    }

    /// Run the sliding window update for `key` in one MULTI/EXEC transaction.
    ///
    /// Only the ZCARD reply is kept; it is read after the prune and before
    /// the new member is added.
    pub async fn slide_window(
        &self,
        key: &str,
        now: i64,
        member: &str,
        window_secs: u64,
    ) -> Result<u64> {
        let mut conn = self.connection.clone();
        let threshold = window_start(now, window_secs);

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(key, "-inf", format!("({}", threshold))
            .ignore()
            .zcard(key)
            .zadd(key, member, now)
            .ignore()
            .expire(key, window_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(RateLimitError::Redis)?;

        Ok(count)
    }

    /// Check if the connection is healthy
    pub async fn health_check(&self) -> Result<()> {
        self.ping().await
    }
}

#[async_trait]
impl WindowStore for RedisClient {
    async fn slide_window(
        &self,
        key: &str,
        now: i64,
        member: &str,
        window_secs: u64,
    ) -> Result<u64> {
        RedisClient::slide_window(self, key, now, member, window_secs).await
    }

    async fn health_check(&self) -> Result<()> {
        RedisClient::health_check(self).await
    }
}

/// Opens Redis clients on demand
#[derive(Debug, Clone)]
pub struct RedisConnector {
    config: RedisConfig,
}

impl RedisConnector {
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn WindowStore>> {
        let client = RedisClient::new(self.config.clone()).await?;
        Ok(Arc::new(client))
    }
}
