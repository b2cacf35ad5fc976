//! Metrics reported by the reconcilers.
//!
//! Workers record through the [`KafkaMetrics`] port. [`PrometheusKafkaMetrics`] forwards to the `metrics` facade, which
//! the internal server renders at `/metrics` through the installed Prometheus recorder.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use std::time::Duration;

use crate::db::models::kafkas::KafkaStatus;

/// Lifecycle operations counted per attempt and per success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KafkaOperation {
    Create,
    Delete,
}

impl KafkaOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            KafkaOperation::Create => "create",
            KafkaOperation::Delete => "delete",
        }
    }
}

pub trait KafkaMetrics: Send + Sync {
    fn increment_operations_total(&self, operation: KafkaOperation);

    fn increment_operations_success(&self, operation: KafkaOperation);

    /// Time from request creation until it reached `status`
    fn observe_creation_duration(&self, status: KafkaStatus, duration: Duration);

    fn set_status_count(&self, status: KafkaStatus, count: i64);

    fn increment_insufficient_quota(&self, kafka_id: &str);
}

/// [`KafkaMetrics`] over the `metrics` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusKafkaMetrics;

impl KafkaMetrics for PrometheusKafkaMetrics {
    fn increment_operations_total(&self, operation: KafkaOperation) {
        counter!("fleet_manager_kafka_operations_total", "operation" => operation.as_str()).increment(1);
    }

    fn increment_operations_success(&self, operation: KafkaOperation) {
        counter!("fleet_manager_kafka_operations_success_total", "operation" => operation.as_str()).increment(1);
    }

    fn observe_creation_duration(&self, status: KafkaStatus, duration: Duration) {
        histogram!("fleet_manager_kafka_creation_duration_seconds", "status" => status.as_str()).record(duration.as_secs_f64());
    }

    fn set_status_count(&self, status: KafkaStatus, count: i64) {
        gauge!("fleet_manager_kafka_requests", "status" => status.as_str()).set(count as f64);
    }

    fn increment_insufficient_quota(&self, kafka_id: &str) {
        tracing::debug!(kafka_id, "Kafka request denied for insufficient quota");
        counter!("fleet_manager_kafka_insufficient_quota_total").increment(1);
    }
}

static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = parking_lot::const_mutex(None);

/// Install the global Prometheus recorder on first use and return its handle.
///
/// Must run before anything is recorded, otherwise the facade macros are no-ops.
pub fn get_or_install_prometheus_handle() -> anyhow::Result<PrometheusHandle> {
    let mut installed = PROMETHEUS_HANDLE.lock();
    if let Some(handle) = installed.as_ref() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    *installed = Some(handle.clone());
    Ok(handle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Keeps every recorded value for assertions
    #[derive(Default)]
    pub(crate) struct RecordingKafkaMetrics {
        pub operations_total: Mutex<HashMap<KafkaOperation, u64>>,
        pub operations_success: Mutex<HashMap<KafkaOperation, u64>>,
        pub creation_durations: Mutex<Vec<(KafkaStatus, Duration)>>,
        pub status_counts: Mutex<HashMap<KafkaStatus, i64>>,
        pub insufficient_quota: Mutex<Vec<String>>,
    }

    impl RecordingKafkaMetrics {
        pub fn total(&self, operation: KafkaOperation) -> u64 {
            self.operations_total.lock().get(&operation).copied().unwrap_or_default()
        }

        pub fn successes(&self, operation: KafkaOperation) -> u64 {
            self.operations_success.lock().get(&operation).copied().unwrap_or_default()
        }
    }

    impl KafkaMetrics for RecordingKafkaMetrics {
        fn increment_operations_total(&self, operation: KafkaOperation) {
            *self.operations_total.lock().entry(operation).or_default() += 1;
        }

        fn increment_operations_success(&self, operation: KafkaOperation) {
            *self.operations_success.lock().entry(operation).or_default() += 1;
        }

        fn observe_creation_duration(&self, status: KafkaStatus, duration: Duration) {
            self.creation_durations.lock().push((status, duration));
        }

        fn set_status_count(&self, status: KafkaStatus, count: i64) {
            self.status_counts.lock().insert(status, count);
        }

        fn increment_insufficient_quota(&self, kafka_id: &str) {
            self.insufficient_quota.lock().push(kafka_id.to_string());
        }
    }

    #[test]
    fn prometheus_metrics_are_rendered() {
        let handle = get_or_install_prometheus_handle().unwrap();
        let metrics = PrometheusKafkaMetrics;

        metrics.increment_operations_total(KafkaOperation::Create);
        metrics.increment_operations_success(KafkaOperation::Create);
        metrics.set_status_count(KafkaStatus::Ready, 3);
        metrics.increment_insufficient_quota("kafka-1");

        let rendered = handle.render();
        assert!(rendered.contains(r#"fleet_manager_kafka_operations_total{operation="create"}"#), "{rendered}");
        assert!(rendered.contains(r#"fleet_manager_kafka_requests{status="ready"} 3"#), "{rendered}");
        assert!(rendered.contains("fleet_manager_kafka_insufficient_quota_total"), "{rendered}");
    }
}
