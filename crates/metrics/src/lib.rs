//! Metrics and tracing setup for siblingkv.
//!
//! Provides a global [`ClientMetrics`] singleton backed by the `prometheus`
//! crate and a text encoder for scraping by whatever HTTP surface the
//! embedding application exposes.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

static METRICS: OnceLock<ClientMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static ClientMetrics {
    METRICS.get_or_init(ClientMetrics::new)
}

/// All Prometheus metrics for a siblingkv client.
pub struct ClientMetrics {
    pub registry: Registry,

    // ── Operation counters ──
    pub fetches: IntCounter,
    pub stores: IntCounter,
    pub deletes: IntCounter,
    pub key_listings: IntCounter,

    // ── Attempts ──
    pub attempts: IntCounterVec,
    pub retries: IntCounter,
    pub failed_attempts: IntCounterVec,

    // ── Latency ──
    pub op_latency_secs: HistogramVec,

    // ── Conflicts ──
    pub siblings_observed: IntCounter,
    pub conflicts_resolved: IntCounter,
    pub conflicts_unresolved: IntCounter,
    pub identity_disagreements: IntCounter,
}

// prometheus types don't derive Debug.
impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics").finish_non_exhaustive()
    }
}

/// Histogram buckets (seconds) for operation latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("static counter options are valid")
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).expect("static counter options are valid")
}

impl ClientMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let fetches = counter("siblingkv_fetches_total", "Fetch operations issued");
        let stores = counter("siblingkv_stores_total", "Store operations issued");
        let deletes = counter("siblingkv_deletes_total", "Delete operations issued");
        let key_listings = counter("siblingkv_key_listings_total", "List-keys operations issued");

        let attempts = counter_vec(
            "siblingkv_attempts_total",
            "Engine attempts, by operation",
            &["op_type"],
        );
        let retries = counter(
            "siblingkv_retries_total",
            "Attempts scheduled after a transient failure",
        );
        let failed_attempts = counter_vec(
            "siblingkv_failed_attempts_total",
            "Failed engine attempts, by error class",
            &["class"],
        );

        let op_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "siblingkv_op_latency_seconds",
                "Operation latency in seconds, retries included",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op_type"],
        )
        .expect("static histogram options are valid");

        let siblings_observed = counter(
            "siblingkv_siblings_observed_total",
            "Fetches that returned more than one version",
        );
        let conflicts_resolved = counter(
            "siblingkv_conflicts_resolved_total",
            "Sibling sets collapsed by a resolver",
        );
        let conflicts_unresolved = counter(
            "siblingkv_conflicts_unresolved_total",
            "Sibling sets a resolver declined to merge",
        );
        let identity_disagreements = counter(
            "siblingkv_identity_disagreements_total",
            "Union merges rejected because siblings disagreed on identity",
        );

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(fetches.clone()),
            Box::new(stores.clone()),
            Box::new(deletes.clone()),
            Box::new(key_listings.clone()),
            Box::new(attempts.clone()),
            Box::new(retries.clone()),
            Box::new(failed_attempts.clone()),
            Box::new(op_latency_secs.clone()),
            Box::new(siblings_observed.clone()),
            Box::new(conflicts_resolved.clone()),
            Box::new(conflicts_unresolved.clone()),
            Box::new(identity_disagreements.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        Self {
            registry,
            fetches,
            stores,
            deletes,
            key_listings,
            attempts,
            retries,
            failed_attempts,
            op_latency_secs,
            siblings_observed,
            conflicts_resolved,
            conflicts_unresolved,
            identity_disagreements,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metrics().registry.gather(), &mut buf) {
        tracing::warn!("prometheus text encoding failed: {}", e);
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

/// Start an operation latency timer. Records elapsed time on drop.
pub fn start_op_timer(op_type: &str) -> prometheus::HistogramTimer {
    metrics()
        .op_latency_secs
        .with_label_values(&[op_type])
        .start_timer()
}

// ────────────────────────── Tests ──────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Histogram;

    #[test]
    fn test_metrics_init_and_increment() {
        let m = metrics();

        let before = m.stores.get();
        m.stores.inc();
        m.stores.inc();
        assert_eq!(m.stores.get(), before + 2);

        let put_attempts = m.attempts.with_label_values(&["put"]);
        let before = put_attempts.get();
        put_attempts.inc();
        assert_eq!(m.attempts.with_label_values(&["put"]).get(), before + 1);
    }

    #[test]
    fn test_encode_metrics_format() {
        metrics().conflicts_resolved.inc();

        let output = encode_metrics();
        assert!(output.contains("siblingkv_conflicts_resolved_total"));
        assert!(output.contains("siblingkv_fetches_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
        tracing::debug!("subscriber installed");
    }

    #[test]
    fn test_timer_records() {
        {
            let _t = start_op_timer("test_op");
        }
        let h: Histogram = metrics().op_latency_secs.with_label_values(&["test_op"]);
        assert_eq!(h.get_sample_count(), 1);
    }
}
