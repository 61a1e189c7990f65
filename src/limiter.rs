use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    config::LimiterSettings,
    error::{RateLimitError, Result},
    metrics::Metrics,
    store::{StoreConnector, WindowStore},
    utils::{rate_limit_key, window_member, TimeSource},
};

/// Outcome of a single sliding window evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub limited: bool,
    /// Requests already in the window before this one was counted
    pub count: u64,
    pub limit: u64,
    pub window_secs: u64,
}

impl Decision {
    pub fn is_limited(&self) -> bool {
        self.limited
    }

    /// Requests still admissible in the current window after this one
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count.saturating_add(1))
    }
}

/// Sliding window rate limiter over a shared store.
///
/// The limiter never errors towards its caller: any store failure is logged,
/// counted and answered with "not limited".
pub struct RateLimiter {
    connector: Arc<dyn StoreConnector>,
    store: RwLock<Option<Arc<dyn WindowStore>>>,
    last_connect_attempt: Mutex<Instant>,
    closed: AtomicBool,
    settings: LimiterSettings,
    time_source: TimeSource,
    metrics: Arc<Metrics>,
}

impl RateLimiter {
    /// Connect to the store and return a ready limiter, or the connection error
    pub async fn connect(
        connector: Arc<dyn StoreConnector>,
        settings: LimiterSettings,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let limiter = Self::disconnected(connector, settings, metrics);
        let store = limiter.open_store().await?;
        limiter.install(store).await;
        Ok(limiter)
    }

    /// Connect to the store, falling back to degraded (fail-open) mode on error.
    ///
    /// A degraded limiter retries the connection from `is_rate_limited` at
    /// most once per reconnect interval.
    pub async fn connect_or_degrade(
        connector: Arc<dyn StoreConnector>,
        settings: LimiterSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let limiter = Self::disconnected(connector, settings, metrics);
        match limiter.open_store().await {
            Ok(store) => limiter.install(store).await,
            Err(e) => warn!("Rate limiter starting degraded, requests fail open: {}", e),
        }
        limiter
    }

    fn disconnected(
        connector: Arc<dyn StoreConnector>,
        settings: LimiterSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        metrics.set_store_connected(false);
        Self {
            connector,
            store: RwLock::new(None),
            last_connect_attempt: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            settings,
            time_source: TimeSource::new(),
            metrics,
        }
    }

    /// Replace the clock used to score requests
    pub fn with_time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Store key used for an identifier
    pub fn key_for(&self, identifier: &str) -> String {
        rate_limit_key(&self.settings.key_prefix, identifier)
    }

    /// Whether the limiter currently has no store and fails open
    pub async fn is_degraded(&self) -> bool {
        self.store.read().await.is_none()
    }

    /// Count this request for `identifier` and report whether it is over budget.
    ///
    /// Returns `false` when the store is unavailable.
    pub async fn is_rate_limited(&self, identifier: &str) -> bool {
        match self.check(identifier).await {
            Ok(decision) => decision.is_limited(),
            Err(e) => {
                warn!(
                    identifier = identifier,
                    "Rate limit check failed, allowing request: {}", e
                );
                self.metrics.record_store_error(e.store_error_kind());
                self.metrics.record_decision("fail_open");
                false
            }
        }
    }

    /// Evaluate the sliding window for `identifier`, surfacing store errors
    pub async fn check(&self, identifier: &str) -> Result<Decision> {
        let store = self
            .current_store()
            .await
            .ok_or(RateLimitError::NotConnected)?;

        let now = self.time_source.unix_now();
        let key = self.key_for(identifier);
        let member = window_member(now);
        let window_secs = self.settings.window_secs;

        let timer = self.metrics.start_store_timer();
        let result = tokio::time::timeout(
            self.settings.operation_timeout(),
            store.slide_window(&key, now, &member, window_secs),
        )
        .await;
        drop(timer);

        let count = result.map_err(|_| {
            RateLimitError::Timeout(format!(
                "sliding window update for '{}' exceeded {}ms",
                key, self.settings.operation_timeout_ms
            ))
        })??;

        let limit = self.settings.max_requests;
        let decision = Decision {
            limited: count >= limit,
            count,
            limit,
            window_secs,
        };

        if decision.limited {
            debug!(identifier = identifier, count = count, "Request over limit");
            self.metrics.record_decision("limited");
        } else {
            self.metrics.record_decision("allowed");
        }

        Ok(decision)
    }

    /// Health check for the underlying store
    pub async fn health_check(&self) -> Result<()> {
        let store = self
            .store
            .read()
            .await
            .clone()
            .ok_or(RateLimitError::NotConnected)?;
        store.health_check().await
    }

    /// Release the store connection. Later checks fail open and no reconnect
    /// is attempted.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.store.write().await.take().is_some() {
            info!("Rate limiter released its store connection");
        }
        self.metrics.set_store_connected(false);
    }

    async fn current_store(&self) -> Option<Arc<dyn WindowStore>> {
        if let Some(store) = self.store.read().await.as_ref() {
            return Some(store.clone());
        }
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.try_reconnect().await
    }

    /// Attempt a reconnect if none is running and the interval has elapsed
    async fn try_reconnect(&self) -> Option<Arc<dyn WindowStore>> {
        let Ok(mut last_attempt) = self.last_connect_attempt.try_lock() else {
            return None;
        };

        // A reconnect may have completed since the caller saw no store
        if let Some(store) = self.store.read().await.as_ref() {
            return Some(store.clone());
        }

        if last_attempt.elapsed() < self.settings.reconnect_interval() {
            return None;
        }
        *last_attempt = Instant::now();

        debug!("Attempting to reconnect rate limit store");
        match self.open_store().await {
            Ok(store) => {
                self.install(store.clone()).await;
                info!("Rate limit store reconnected");
                Some(store)
            }
            Err(e) => {
                warn!("Rate limit store reconnect failed: {}", e);
                None
            }
        }
    }

    async fn open_store(&self) -> Result<Arc<dyn WindowStore>> {
        let timeout = self.settings.connect_timeout();
        let result = match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(RateLimitError::Timeout(format!(
                "store connection exceeded {}ms",
                timeout.as_millis()
            ))),
        };
        if result.is_err() {
            self.metrics.record_store_error("connect");
        }
        result
    }

    async fn install(&self, store: Arc<dyn WindowStore>) {
        *self.store.write().await = Some(store);
        self.metrics.set_store_connected(true);
    }
}
