//! Prometheus metrics for the ingestion service, named exactly as the
//! design's metrics table. Each instance registers into its own
//! `prometheus::Registry` rather than the process-wide default, so
//! `ServiceMetrics::new()` can be called more than once (once per test)
//! without hitting an "already registered" panic.

use std::sync::Arc;

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};

#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    pub events_ingested_total: IntCounterVec,
    pub events_duplicate_total: IntCounterVec,
    pub webhooks_queued_total: IntCounterVec,
    pub webhooks_queued_overflow_total: IntCounterVec,
    pub rate_limit_tracked_identities: IntGaugeVec,
    pub ingestion_duration_seconds: HistogramVec,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let events_ingested_total = register_int_counter_vec_with_registry!(
            "events_ingested_total",
            "Upstream events processed, by event type and classified outcome",
            &["event_type", "outcome"],
            registry
        )?;
        let events_duplicate_total = register_int_counter_vec_with_registry!(
            "events_duplicate_total",
            "Upstream events rejected as already-processed replays",
            &["event_type"],
            registry
        )?;
        let webhooks_queued_total = register_int_counter_vec_with_registry!(
            "webhooks_queued_total",
            "Outbound partner deliveries enqueued, by event type",
            &["event_type"],
            registry
        )?;
        let webhooks_queued_overflow_total = register_int_counter_vec_with_registry!(
            "webhooks_queued_overflow_total",
            "Enqueue attempts made while a tenant's pending queue exceeded the soft cap",
            &["tenant"],
            registry
        )?;
        let rate_limit_tracked_identities = register_int_gauge_vec_with_registry!(
            "rate_limit_tracked_identities",
            "Token buckets currently tracked by the rate limiter",
            &["endpoint"],
            registry
        )?;
        let ingestion_duration_seconds = register_histogram_vec_with_registry!(
            "ingestion_duration_seconds",
            "Time to process one inbound upstream event end-to-end",
            &["event_type"],
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            registry
        )?;

        Ok(Arc::new(Self {
            registry,
            events_ingested_total,
            events_duplicate_total,
            webhooks_queued_total,
            webhooks_queued_overflow_total,
            rate_limit_tracked_identities,
            ingestion_duration_seconds,
        }))
    }

    pub fn record_ingested(&self, event_type: &str, outcome: &str) {
        self.events_ingested_total.with_label_values(&[event_type, outcome]).inc();
    }

    pub fn record_duplicate(&self, event_type: &str) {
        self.events_duplicate_total.with_label_values(&[event_type]).inc();
    }

    pub fn record_queued(&self, event_type: &str, count: usize) {
        self.webhooks_queued_total.with_label_values(&[event_type]).inc_by(count as u64);
    }

    pub fn record_queue_overflow(&self, tenant: &str) {
        self.webhooks_queued_overflow_total.with_label_values(&[tenant]).inc();
    }

    pub fn set_rate_limit_tracked_identities(&self, endpoint: &str, count: i64) {
        self.rate_limit_tracked_identities.with_label_values(&[endpoint]).set(count);
    }

    pub fn observe_ingestion_duration(&self, event_type: &str, seconds: f64) {
        self.ingestion_duration_seconds.with_label_values(&[event_type]).observe(seconds);
    }

    /// Render this instance's registry in Prometheus text exposition
    /// format for the `/metrics` endpoint.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_encodes_without_panicking() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_ingested("participant_left", "completed");
        metrics.record_duplicate("participant_left");
        metrics.record_queued("participant_left", 2);
        metrics.set_rate_limit_tracked_identities("/webhooks/call_completed", 3);
        metrics.observe_ingestion_duration("participant_left", 0.01);

        let text = metrics.encode().unwrap();
        assert!(text.contains("events_ingested_total"));
    }

    #[test]
    fn two_instances_do_not_collide() {
        let a = ServiceMetrics::new().unwrap();
        let b = ServiceMetrics::new().unwrap();
        a.record_ingested("room_finished", "completed");
        b.record_ingested("room_finished", "completed");
    }
}
