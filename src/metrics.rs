use prometheus::{
    Histogram, HistogramOpts, HistogramTimer, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector for the rate limiter and gate
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Limiter decisions
    decisions: IntCounterVec,

    // Store metrics
    store_errors: IntCounterVec,
    store_operation_duration: Histogram,
    store_connected: IntGauge,

    // Gate metrics
    gate_requests: IntCounterVec,
}

impl Metrics {
    /// Create a new metrics instance with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let decisions = IntCounterVec::new(
            Opts::new(
                "ratelimit_decisions_total",
                "Rate limit decisions by outcome",
            ),
            &["decision"],
        )?;

        let store_errors = IntCounterVec::new(
            Opts::new(
                "ratelimit_store_errors_total",
                "Store failures by kind",
            ),
            &["kind"],
        )?;

        let store_operation_duration = Histogram::with_opts(HistogramOpts::new(
            "ratelimit_store_operation_duration_seconds",
            "Duration of sliding window store operations in seconds",
        ))?;

        let store_connected = IntGauge::new(
            "ratelimit_store_connected",
            "Whether the limiter currently holds a store connection",
        )?;

        let gate_requests = IntCounterVec::new(
            Opts::new(
                "ratelimit_gate_requests_total",
                "Requests seen by the gate by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(store_operation_duration.clone()))?;
        registry.register(Box::new(store_connected.clone()))?;
        registry.register(Box::new(gate_requests.clone()))?;

        Ok(Self {
            registry,
            decisions,
            store_errors,
            store_operation_duration,
            store_connected,
            gate_requests,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a limiter decision (`allowed`, `limited` or `fail_open`)
    pub fn record_decision(&self, decision: &str) {
        self.decisions.with_label_values(&[decision]).inc();
    }

    pub fn decision_total(&self, decision: &str) -> u64 {
        self.decisions.with_label_values(&[decision]).get()
    }

    /// Record a store failure
    pub fn record_store_error(&self, kind: &str) {
        self.store_errors.with_label_values(&[kind]).inc();
    }

    pub fn store_error_total(&self, kind: &str) -> u64 {
        self.store_errors.with_label_values(&[kind]).get()
    }

    /// Create a timer for measuring a store operation
    pub fn start_store_timer(&self) -> HistogramTimer {
        self.store_operation_duration.start_timer()
    }

    pub fn set_store_connected(&self, connected: bool) {
        self.store_connected.set(i64::from(connected));
    }

    pub fn store_connected(&self) -> bool {
        self.store_connected.get() == 1
    }

    /// Record a gate outcome (`forwarded` or `rejected`)
    pub fn record_gate_request(&self, outcome: &str) {
        self.gate_requests.with_label_values(&[outcome]).inc();
    }

    pub fn gate_request_total(&self, outcome: &str) -> u64 {
        self.gate_requests.with_label_values(&[outcome]).get()
    }
}
