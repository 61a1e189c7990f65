use chrono::Utc;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};
use uuid::Uuid;

/// Clock used for sliding window calculations.
///
/// `System` reads the wall clock. `Manual` holds a shared, settable Unix
/// timestamp so tests can step through windows without sleeping.
#[derive(Debug, Clone, Default)]
pub enum TimeSource {
    #[default]
    System,
    Manual(Arc<AtomicI64>),
}

impl TimeSource {
    pub fn new() -> Self {
        TimeSource::System
    }

    /// Create a manual clock starting at the given Unix timestamp
    pub fn manual(start_secs: i64) -> Self {
        TimeSource::Manual(Arc::new(AtomicI64::new(start_secs)))
    }

    /// Get the current Unix timestamp in whole seconds
    pub fn unix_now(&self) -> i64 {
        match self {
            TimeSource::System => Utc::now().timestamp(),
            TimeSource::Manual(now) => now.load(Ordering::SeqCst),
        }
    }

    /// Move a manual clock forward. No-op for the system clock.
    pub fn advance(&self, secs: i64) {
        if let TimeSource::Manual(now) = self {
            now.fetch_add(secs, Ordering::SeqCst);
        }
    }
}

/// Generate the store key holding an identifier's window
pub fn rate_limit_key(prefix: &str, identifier: &str) -> String {
    format!("{}:{}", prefix, identifier)
}

/// Generate a window member for a request counted at `now`.
///
/// Members are unique per request so that several requests in the same
/// second are all counted instead of collapsing into one set entry.
pub fn window_member(now: i64) -> String {
    format!("{}-{}", now, Uuid::new_v4())
}

/// Lowest score still inside a window ending at `now`
pub fn window_start(now: i64, window_secs: u64) -> i64 {
    now.saturating_sub(window_secs as i64)
}
