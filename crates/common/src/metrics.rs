//! Metrics collection for OPML worker nodes
//!
//! This module provides Prometheus metrics for observability.
//! Per-engine series are labelled with the engine name (`llama`, `mips`).

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;

/// Metrics registry for a worker node
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub questions: QuestionMetrics,
    pub engines: EngineMetrics,
    pub delivery: DeliveryMetrics,
}

/// Inbound question metrics
#[derive(Debug, Clone)]
pub struct QuestionMetrics {
    /// Questions accepted and dispatched to both engines
    pub accepted: IntCounter,

    /// Questions rejected, by reason
    pub rejected: IntCounterVec,

    /// Records waiting for their second fragment
    pub pending_records: IntGauge,

    /// Records evicted by the orphan sweep
    pub orphans_evicted: IntCounter,
}

/// Engine execution metrics
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    /// Finished engine runs, by engine and outcome
    pub runs: IntCounterVec,

    /// Engine run duration
    pub duration: HistogramVec,

    /// Jobs currently holding an admission slot
    pub in_flight: IntGaugeVec,
}

/// Outbound delivery metrics
#[derive(Debug, Clone)]
pub struct DeliveryMetrics {
    pub callbacks_delivered: IntCounter,
    pub callbacks_failed: IntCounter,
    pub heartbeats_sent: IntCounter,
    pub heartbeats_failed: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        // Question metrics
        let accepted = IntCounter::new(
            "opml_questions_accepted_total",
            "Total number of questions dispatched to both engines",
        )
        .unwrap();

        let rejected = IntCounterVec::new(
            Opts::new("opml_questions_rejected_total", "Total number of rejected questions"),
            &["reason"],
        )
        .unwrap();

        let pending_records = IntGauge::new(
            "opml_pending_records",
            "Records waiting for the remaining engine fragment",
        )
        .unwrap();

        let orphans_evicted = IntCounter::new(
            "opml_orphans_evicted_total",
            "Incomplete records evicted by the orphan sweep",
        )
        .unwrap();

        // Engine metrics
        let runs = IntCounterVec::new(
            Opts::new("opml_engine_runs_total", "Finished engine runs"),
            &["engine", "outcome"],
        )
        .unwrap();

        let duration = HistogramVec::new(
            HistogramOpts::new("opml_engine_duration_seconds", "Engine run duration in seconds")
                .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["engine"],
        )
        .unwrap();

        let in_flight = IntGaugeVec::new(
            Opts::new("opml_engine_in_flight", "Jobs holding an engine admission slot"),
            &["engine"],
        )
        .unwrap();

        // Delivery metrics
        let callbacks_delivered = IntCounter::new(
            "opml_callbacks_delivered_total",
            "Callbacks accepted by the callback endpoint",
        )
        .unwrap();

        let callbacks_failed = IntCounter::new(
            "opml_callbacks_failed_total",
            "Callbacks that failed and were dropped",
        )
        .unwrap();

        let heartbeats_sent = IntCounter::new("opml_heartbeats_sent_total", "Heartbeats accepted by the dispatcher").unwrap();

        let heartbeats_failed = IntCounter::new("opml_heartbeats_failed_total", "Heartbeats that failed").unwrap();

        // Register all metrics
        registry.register(Box::new(accepted.clone())).unwrap();
        registry.register(Box::new(rejected.clone())).unwrap();
        registry.register(Box::new(pending_records.clone())).unwrap();
        registry.register(Box::new(orphans_evicted.clone())).unwrap();

        registry.register(Box::new(runs.clone())).unwrap();
        registry.register(Box::new(duration.clone())).unwrap();
        registry.register(Box::new(in_flight.clone())).unwrap();

        registry.register(Box::new(callbacks_delivered.clone())).unwrap();
        registry.register(Box::new(callbacks_failed.clone())).unwrap();
        registry.register(Box::new(heartbeats_sent.clone())).unwrap();
        registry.register(Box::new(heartbeats_failed.clone())).unwrap();

        MetricsRegistry {
            registry,
            questions: QuestionMetrics {
                accepted,
                rejected,
                pending_records,
                orphans_evicted,
            },
            engines: EngineMetrics {
                runs,
                duration,
                in_flight,
            },
            delivery: DeliveryMetrics {
                callbacks_delivered,
                callbacks_failed,
                heartbeats_sent,
                heartbeats_failed,
            },
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# failed to encode metrics: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new();

        // Record some metrics
        metrics.questions.accepted.inc();
        metrics.questions.rejected.with_label_values(&["jobs_exceeded"]).inc();
        metrics.engines.in_flight.with_label_values(&["llama"]).set(1);
        metrics.engines.runs.with_label_values(&["mips", "timeout"]).inc();

        // Gather metrics
        let output = metrics.gather();
        assert!(output.contains("opml_questions_accepted_total 1"));
        assert!(output.contains("reason=\"jobs_exceeded\""));
        assert!(output.contains("opml_engine_in_flight{engine=\"llama\"} 1"));
        assert!(output.contains("outcome=\"timeout\""));
    }
}
