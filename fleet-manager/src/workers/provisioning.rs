use async_trait::async_trait;
use bon::Builder;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::Reconciler;
use crate::db::models::kafkas::{KafkaRequest, KafkaStatus};
use crate::metrics::{KafkaMetrics, KafkaOperation};
use crate::services::{
    kafka::KafkaService,
    kafka_state::{KafkaState, KafkaStateProvider},
};

/// Polls the data plane for provisioning requests and marks them ready.
///
/// Without a state provider the worker does nothing: with fleetshard sync the data plane reports status itself.
#[derive(Builder)]
pub struct ProvisioningKafkaManager {
    kafkas: Arc<dyn KafkaService>,
    state_provider: Option<Arc<dyn KafkaStateProvider>>,
    metrics: Arc<dyn KafkaMetrics>,
}

impl ProvisioningKafkaManager {
    #[instrument(skip(self, state_provider, kafka), fields(kafka_id = %kafka.id), err)]
    async fn reconcile_provisioning_kafka(
        &self,
        state_provider: &dyn KafkaStateProvider,
        mut kafka: KafkaRequest,
    ) -> anyhow::Result<()> {
        let since_created = (Utc::now() - kafka.created_at).to_std().unwrap_or_default();

        match state_provider.get_kafka_state(&kafka).await? {
            KafkaState::Installing => {
                debug!("Kafka is still installing");
            }
            KafkaState::Ready => {
                kafka.status = KafkaStatus::Ready;
                self.kafkas.update(&kafka).await?;
                self.metrics.observe_creation_duration(KafkaStatus::Ready, since_created);
                self.metrics.increment_operations_success(KafkaOperation::Create);
                self.metrics.increment_operations_total(KafkaOperation::Create);
                info!("Kafka is ready");
            }
            KafkaState::Error(reason) => {
                warn!(reason, "Kafka installation failed");
                kafka.mark_failed(reason);
                self.kafkas.update(&kafka).await?;
                self.metrics.observe_creation_duration(KafkaStatus::Failed, since_created);
                self.metrics.increment_operations_total(KafkaOperation::Create);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ProvisioningKafkaManager {
    fn name(&self) -> &'static str {
        "provisioning_kafka"
    }

    async fn reconcile(&self) -> Vec<anyhow::Error> {
        let Some(state_provider) = &self.state_provider else {
            return Vec::new();
        };

        let provisioning = match self.kafkas.list_by_status(&[KafkaStatus::Provisioning]).await {
            Ok(provisioning) => provisioning,
            Err(e) => return vec![anyhow::Error::new(e).context("failed to list provisioning kafkas")],
        };

        let mut errors = Vec::new();
        for kafka in provisioning {
            let id = kafka.id;
            if let Err(e) = self.reconcile_provisioning_kafka(state_provider.as_ref(), kafka).await {
                errors.push(e.context(format!("failed to reconcile provisioning kafka {id}")));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::RecordingKafkaMetrics;
    use crate::services::kafka::InMemoryKafkaService;
    use crate::workers::tests::kafka_in;
    use anyhow::anyhow;

    struct FixedState(Option<KafkaState>);

    #[async_trait]
    impl KafkaStateProvider for FixedState {
        async fn get_kafka_state(&self, _: &KafkaRequest) -> anyhow::Result<KafkaState> {
            self.0.clone().ok_or_else(|| anyhow!("data plane unreachable"))
        }
    }

    fn worker(
        kafka: &KafkaRequest,
        state: Option<FixedState>,
    ) -> (Arc<InMemoryKafkaService>, Arc<RecordingKafkaMetrics>, ProvisioningKafkaManager) {
        let kafkas = Arc::new(InMemoryKafkaService::new([kafka.clone()]));
        let metrics = Arc::new(RecordingKafkaMetrics::default());
        let worker = ProvisioningKafkaManager::builder()
            .kafkas(kafkas.clone())
            .maybe_state_provider(state.map(|s| Arc::new(s) as Arc<dyn KafkaStateProvider>))
            .metrics(metrics.clone())
            .build();
        (kafkas, metrics, worker)
    }

    #[tokio::test]
    async fn ready_state_completes_the_request() {
        let kafka = kafka_in(KafkaStatus::Provisioning);
        let (kafkas, metrics, worker) = worker(&kafka, Some(FixedState(Some(KafkaState::Ready))));

        assert!(worker.reconcile().await.is_empty());

        assert_eq!(kafkas.snapshot(kafka.id).unwrap().status, KafkaStatus::Ready);
        assert_eq!(metrics.successes(KafkaOperation::Create), 1);
        assert_eq!(metrics.total(KafkaOperation::Create), 1);
        assert_eq!(metrics.creation_durations.lock()[0].0, KafkaStatus::Ready);
    }

    #[tokio::test]
    async fn installing_state_waits() {
        let kafka = kafka_in(KafkaStatus::Provisioning);
        let (kafkas, metrics, worker) = worker(&kafka, Some(FixedState(Some(KafkaState::Installing))));

        assert!(worker.reconcile().await.is_empty());

        assert_eq!(kafkas.snapshot(kafka.id).unwrap().status, KafkaStatus::Provisioning);
        assert_eq!(metrics.total(KafkaOperation::Create), 0);
    }

    #[tokio::test]
    async fn error_state_fails_the_request() {
        let kafka = kafka_in(KafkaStatus::Provisioning);
        let (kafkas, _, worker) = worker(&kafka, Some(FixedState(Some(KafkaState::Error("no brokers".to_string())))));

        assert!(worker.reconcile().await.is_empty());

        let stored = kafkas.snapshot(kafka.id).unwrap();
        assert_eq!(stored.status, KafkaStatus::Failed);
        assert_eq!(stored.failed_reason.as_deref(), Some("no brokers"));
    }

    #[tokio::test]
    async fn unreachable_data_plane_is_reported() {
        let kafka = kafka_in(KafkaStatus::Provisioning);
        let (kafkas, _, worker) = worker(&kafka, Some(FixedState(None)));

        assert_eq!(worker.reconcile().await.len(), 1);
        assert_eq!(kafkas.snapshot(kafka.id).unwrap().status, KafkaStatus::Provisioning);
    }

    #[tokio::test]
    async fn fleetshard_sync_makes_the_worker_a_no_op() {
        let kafka = kafka_in(KafkaStatus::Provisioning);
        let (kafkas, _, worker) = worker(&kafka, None);

        assert!(worker.reconcile().await.is_empty());
        assert_eq!(kafkas.snapshot(kafka.id).unwrap().status, KafkaStatus::Provisioning);
    }
}
