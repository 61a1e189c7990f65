//! Sliding Window Rate Limiter
//!
//! Per-caller request budgets counted over a trailing time window in a shared
//! Redis sorted set, so every process instance enforces the same limit. An
//! axum gate puts the limiter in front of any handler. Store failures never
//! block traffic: the limiter fails open and reports the failure.

pub mod config;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod metrics;
pub mod redis;
pub mod store;
pub mod utils;

// Re-export main types
pub use config::Settings;
pub use error::{RateLimitError, Result};
pub use gate::{rate_limit_middleware, Gate};
pub use limiter::{Decision, RateLimiter};
pub use store::{MemoryWindowStore, StoreConnector, WindowStore};
