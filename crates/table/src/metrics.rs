//! Table metrics using the native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters.
//! Use traces for event-level granularity during investigations.

use prometheus::{register_counter, register_gauge, Counter, Gauge};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific metrics for table monitoring.
pub struct Metrics {
    // === Propagation ===
    pub puts_issued: Counter,
    pub put_bytes_written: Counter,

    // === Failure detection ===
    pub rows_frozen: Counter,

    // === Predicate engine ===
    pub predicate_fires: Counter,
    pub trigger_panics: Counter,
    pub evaluator_passes: Counter,
    pub predicates_registered: Gauge,
}

impl Metrics {
    fn new() -> Self {
        Self {
            puts_issued: register_counter!(
                "rowsync_puts_total",
                "Total put operations issued against remote rows"
            )
            .unwrap(),

            put_bytes_written: register_counter!(
                "rowsync_put_bytes_total",
                "Total bytes propagated to remote rows"
            )
            .unwrap(),

            rows_frozen: register_counter!(
                "rowsync_rows_frozen_total",
                "Total rows frozen after detected peer failure"
            )
            .unwrap(),

            predicate_fires: register_counter!(
                "rowsync_predicate_fires_total",
                "Total trigger invocations by the predicate evaluator"
            )
            .unwrap(),

            trigger_panics: register_counter!(
                "rowsync_trigger_panics_total",
                "Total predicate entries removed after a trigger panic"
            )
            .unwrap(),

            evaluator_passes: register_counter!(
                "rowsync_evaluator_passes_total",
                "Total predicate evaluator loop passes"
            )
            .unwrap(),

            predicates_registered: register_gauge!(
                "rowsync_predicates_registered",
                "Predicate entries currently registered with the evaluator"
            )
            .unwrap(),
        }
    }
}

/// Get or initialize the global metrics instance.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Record a put operation and the bytes it propagated.
pub fn record_put(bytes_per_target: usize, targets_written: usize) {
    let m = metrics();
    m.puts_issued.inc();
    m.put_bytes_written
        .inc_by((bytes_per_target * targets_written) as f64);
}

/// Record a row transitioning to frozen.
pub fn record_row_frozen() {
    metrics().rows_frozen.inc();
}

/// Record a trigger invocation.
pub fn record_predicate_fire() {
    metrics().predicate_fires.inc();
}

/// Record a predicate entry removed after its trigger panicked.
pub fn record_trigger_panic() {
    metrics().trigger_panics.inc();
}

/// Record one evaluator pass and the current entry count.
pub fn record_evaluator_pass(registered: usize) {
    let m = metrics();
    m.evaluator_passes.inc();
    m.predicates_registered.set(registered as f64);
}
