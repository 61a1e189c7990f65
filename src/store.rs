use async_trait::async_trait;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::Result, utils::window_start};

/// Shared counting store backing the sliding window.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Slide the window for `key` and count the current request.
    ///
    /// As one atomic unit: drop members scored below `now - window_secs`,
    /// read the remaining cardinality, add `member` scored at `now` and
    /// refresh the key TTL to `window_secs`. Returns the cardinality read
    /// before the insert.
    async fn slide_window(
        &self,
        key: &str,
        now: i64,
        member: &str,
        window_secs: u64,
    ) -> Result<u64>;

    /// Health check for the store
    async fn health_check(&self) -> Result<()>;
}

/// Produces store handles, used for the first connection and for reconnects
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn WindowStore>>;
}

/// An already constructed store is its own connector
#[async_trait]
impl<S: WindowStore + 'static> StoreConnector for Arc<S> {
    async fn connect(&self) -> Result<Arc<dyn WindowStore>> {
        Ok(self.clone())
    }
}

#[derive(Debug, Default)]
struct Window {
    members: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
    expires_at: i64,
}

impl Window {
    /// Drop members scored below `threshold`
    fn prune(&mut self, threshold: i64) {
        let kept = self.members.split_off(&(threshold, String::new()));
        for (_, member) in std::mem::replace(&mut self.members, kept) {
            self.scores.remove(&member);
        }
    }

    /// Add `member` at `score`, moving it if it is already present
    fn insert(&mut self, score: i64, member: &str) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.members.remove(&(previous, member.to_string()));
        }
        self.members.insert((score, member.to_string()));
    }
}

#[derive(Debug, Default)]
struct Windows {
    keys: HashMap<String, Window>,
    next_sweep: i64,
}

impl Windows {
    fn sweep(&mut self, now: i64) -> usize {
        let before = self.keys.len();
        self.keys.retain(|_, window| window.expires_at > now);
        before - self.keys.len()
    }
}

/// In-process window store with the same semantics as the Redis store.
///
/// Key expiry is evaluated against the `now` supplied by the caller, so a
/// manual clock drives both eviction and TTL. Expired keys are swept from
/// `slide_window` at most once per window length.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: Mutex<Windows>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live members for `key` as seen at `now`, without recording a hit
    pub async fn count(&self, key: &str, now: i64) -> usize {
        let windows = self.windows.lock().await;
        match windows.keys.get(key) {
            Some(window) if window.expires_at > now => window.members.len(),
            _ => 0,
        }
    }

    /// Whether `key` is still retained at `now`
    pub async fn contains_key(&self, key: &str, now: i64) -> bool {
        let windows = self.windows.lock().await;
        windows
            .keys
            .get(key)
            .is_some_and(|window| window.expires_at > now)
    }

    /// Number of keys held in memory, expired or not
    pub async fn key_count(&self) -> usize {
        self.windows.lock().await.keys.len()
    }

    /// Drop every expired key
    pub async fn purge_expired(&self, now: i64) -> usize {
        self.windows.lock().await.sweep(now)
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn slide_window(
        &self,
        key: &str,
        now: i64,
        member: &str,
        window_secs: u64,
    ) -> Result<u64> {
        let mut windows = self.windows.lock().await;

        if now >= windows.next_sweep {
            let swept = windows.sweep(now);
            if swept > 0 {
                debug!("Swept {} expired windows", swept);
            }
            windows.next_sweep = now.saturating_add(window_secs.max(1) as i64);
        } else if windows
            .keys
            .get(key)
            .is_some_and(|window| window.expires_at <= now)
        {
            windows.keys.remove(key);
        }

        let window = windows.keys.entry(key.to_string()).or_default();
        window.prune(window_start(now, window_secs));

        let count = window.members.len() as u64;
        window.insert(now, member);
        window.expires_at = now.saturating_add(window_secs as i64);

        Ok(count)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
