//! Prometheus metrics for the delivery worker: the counters, gauges, and
//! histograms from the metrics design not already owned by the ingestion
//! service. Each instance owns its own `Registry`, same rationale as
//! `webhook_api::metrics::ServiceMetrics`.

use std::sync::Arc;

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};

#[derive(Debug)]
pub struct WorkerMetrics {
    registry: Registry,

    pub webhooks_delivered_total: IntCounterVec,
    pub webhooks_failed_total: IntCounterVec,
    pub webhooks_dead_letter_total: IntCounterVec,
    pub retry_attempts_total: IntCounterVec,
    pub delivery_latency_seconds: HistogramVec,
    pub queue_size: IntGaugeVec,
    pub queue_oldest_age_seconds: IntGaugeVec,
    pub active_workers: IntGaugeVec,
}

impl WorkerMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let webhooks_delivered_total = register_int_counter_vec_with_registry!(
            "webhooks_delivered_total",
            "Outbound partner deliveries that succeeded",
            &["event_type"],
            registry
        )?;
        let webhooks_failed_total = register_int_counter_vec_with_registry!(
            "webhooks_failed_total",
            "Outbound partner delivery attempts that failed",
            &["event_type", "status"],
            registry
        )?;
        let webhooks_dead_letter_total = register_int_counter_vec_with_registry!(
            "webhooks_dead_letter_total",
            "Deliveries that exhausted retries or hit a non-retryable error",
            &["event_type"],
            registry
        )?;
        let retry_attempts_total = register_int_counter_vec_with_registry!(
            "retry_attempts_total",
            "Delivery attempts broken down by attempt number",
            &["attempt"],
            registry
        )?;
        let delivery_latency_seconds = register_histogram_vec_with_registry!(
            "delivery_latency_seconds",
            "Wall-clock time for one outbound delivery POST",
            &["partner"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            registry
        )?;
        let queue_size = register_int_gauge_vec_with_registry!(
            "queue_size",
            "Delivery queue rows by status",
            &["status"],
            registry
        )?;
        let queue_oldest_age_seconds = register_int_gauge_vec_with_registry!(
            "queue_oldest_age_seconds",
            "Age in seconds of the oldest pending queue row",
            &["tenant"],
            registry
        )?;
        let active_workers = register_int_gauge_vec_with_registry!(
            "active_workers",
            "Worker processes currently polling the queue",
            &["worker_id"],
            registry
        )?;

        Ok(Arc::new(Self {
            registry,
            webhooks_delivered_total,
            webhooks_failed_total,
            webhooks_dead_letter_total,
            retry_attempts_total,
            delivery_latency_seconds,
            queue_size,
            queue_oldest_age_seconds,
            active_workers,
        }))
    }

    pub fn record_delivered(&self, event_type: &str) {
        self.webhooks_delivered_total.with_label_values(&[event_type]).inc();
    }

    pub fn record_failed(&self, event_type: &str, status: &str) {
        self.webhooks_failed_total.with_label_values(&[event_type, status]).inc();
    }

    pub fn record_dead_letter(&self, event_type: &str) {
        self.webhooks_dead_letter_total.with_label_values(&[event_type]).inc();
    }

    pub fn record_retry_attempt(&self, attempt: u32) {
        self.retry_attempts_total.with_label_values(&[&attempt.to_string()]).inc();
    }

    pub fn observe_delivery_latency(&self, partner: &str, seconds: f64) {
        self.delivery_latency_seconds.with_label_values(&[partner]).observe(seconds);
    }

    pub fn set_queue_size(&self, status: &str, count: i64) {
        self.queue_size.with_label_values(&[status]).set(count);
    }

    pub fn set_queue_oldest_age_seconds(&self, tenant: &str, age: i64) {
        self.queue_oldest_age_seconds.with_label_values(&[tenant]).set(age);
    }

    pub fn set_active_workers(&self, worker_id: &str, count: i64) {
        self.active_workers.with_label_values(&[worker_id]).set(count);
    }

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
        let metrics = WorkerMetrics::new().unwrap();
        metrics.record_delivered("participant_left");
        metrics.record_failed("participant_left", "503");
        metrics.record_dead_letter("participant_left");
        metrics.record_retry_attempt(1);
        metrics.observe_delivery_latency("acme", 0.2);
        metrics.set_queue_size("pending", 3);
        metrics.set_queue_oldest_age_seconds("t1", 120);
        metrics.set_active_workers("worker-1", 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("webhooks_delivered_total"));
    }

    #[test]
    fn two_instances_do_not_collide() {
        let a = WorkerMetrics::new().unwrap();
        let b = WorkerMetrics::new().unwrap();
        a.record_delivered("room_finished");
        b.record_delivered("room_finished");
    }
}
