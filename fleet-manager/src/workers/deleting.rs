use anyhow::Context;
use async_trait::async_trait;
use bon::Builder;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

use super::Reconciler;
use crate::db::models::kafkas::{KafkaRequest, KafkaStatus};
use crate::metrics::{KafkaMetrics, KafkaOperation};
use crate::services::{kafka::KafkaService, quota::QuotaServiceFactory};

/// Releases quota for requests on their way out and removes them.
///
/// `deprovision` requests are only swept here when nothing on the data plane has to be torn down first: when
/// fleetshard sync is disabled, or when the request never got far enough to be provisioned.
#[derive(Builder)]
pub struct DeletingKafkaManager {
    kafkas: Arc<dyn KafkaService>,
    quota_services: QuotaServiceFactory,
    metrics: Arc<dyn KafkaMetrics>,
    #[builder(default = true)]
    enable_kas_fleetshard_sync: bool,
    #[builder(default)]
    enable_authentication_on_kafka: bool,
}

impl DeletingKafkaManager {
    /// Whether a `deprovision` request can be deleted without waiting for the data plane
    pub fn is_sweepable(&self, kafka: &KafkaRequest) -> bool {
        !self.enable_kas_fleetshard_sync
            || !kafka.has_bootstrap_server_host()
            || (self.enable_authentication_on_kafka && !kafka.has_sso_credentials())
    }

    async fn requests_to_delete(&self) -> anyhow::Result<Vec<KafkaRequest>> {
        let mut kafkas = self
            .kafkas
            .list_by_status(&[KafkaStatus::Deleting, KafkaStatus::Deleted])
            .await
            .context("failed to list deleting kafkas")?;

        let deprovisioning = self
            .kafkas
            .list_by_status(&[KafkaStatus::Deprovision])
            .await
            .context("failed to list deprovisioning kafkas")?;
        kafkas.extend(deprovisioning.into_iter().filter(|k| self.is_sweepable(k)));

        let mut seen = HashSet::new();
        kafkas.retain(|k| seen.insert(k.id));
        Ok(kafkas)
    }

    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id, status = %kafka.status), err)]
    async fn reconcile_deleting_kafka(&self, kafka: &KafkaRequest) -> anyhow::Result<()> {
        self.quota_services
            .get_quota_service(kafka.quota_type)?
            .delete_quota(kafka.subscription_id.as_deref())
            .await
            .context("failed to release quota")?;

        self.kafkas.delete(kafka.id).await?;
        info!("Deleted kafka request");
        Ok(())
    }
}

#[async_trait]
impl Reconciler for DeletingKafkaManager {
    fn name(&self) -> &'static str {
        "deleting_kafka"
    }

    async fn reconcile(&self) -> Vec<anyhow::Error> {
        let kafkas = match self.requests_to_delete().await {
            Ok(kafkas) => kafkas,
            Err(e) => return vec![e],
        };

        let mut errors = Vec::new();
        for kafka in &kafkas {
            self.metrics.increment_operations_total(KafkaOperation::Delete);
            match self.reconcile_deleting_kafka(kafka).await {
                Ok(()) => self.metrics.increment_operations_success(KafkaOperation::Delete),
                Err(e) => errors.push(e.context(format!("failed to reconcile deleting kafka {}", kafka.id))),
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaType;
    use crate::errors::{Result, ServiceError};
    use crate::metrics::tests::RecordingKafkaMetrics;
    use crate::services::kafka::InMemoryKafkaService;
    use crate::services::quota::QuotaService;
    use crate::workers::tests::kafka_in;
    use parking_lot::Mutex;
    use rstest::rstest;

    #[derive(Default)]
    struct RecordingQuota {
        fail_for: Option<&'static str>,
        released: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QuotaService for RecordingQuota {
        async fn check_if_quota_is_defined_for_instance_type(&self, _: &KafkaRequest, _: &str) -> Result<bool> {
            Ok(true)
        }

        async fn reserve_quota(&self, _: &mut KafkaRequest) -> Result<Option<String>> {
            Ok(None)
        }

        async fn delete_quota(&self, subscription_id: Option<&str>) -> Result<()> {
            let Some(subscription_id) = subscription_id else {
                return Ok(());
            };
            if self.fail_for == Some(subscription_id) {
                return Err(ServiceError::general("entitlement system unavailable"));
            }
            self.released.lock().push(subscription_id.to_string());
            Ok(())
        }
    }

    fn worker(
        kafkas: Arc<InMemoryKafkaService>,
        quota: Arc<RecordingQuota>,
        fleetshard_sync: bool,
        authentication: bool,
    ) -> (DeletingKafkaManager, Arc<RecordingKafkaMetrics>) {
        let metrics = Arc::new(RecordingKafkaMetrics::default());
        let worker = DeletingKafkaManager::builder()
            .kafkas(kafkas)
            .quota_services(QuotaServiceFactory::new(Some(quota.clone()), quota))
            .metrics(metrics.clone())
            .enable_kas_fleetshard_sync(fleetshard_sync)
            .enable_authentication_on_kafka(authentication)
            .build();
        (worker, metrics)
    }

    fn provisioned(status: KafkaStatus) -> KafkaRequest {
        let mut kafka = kafka_in(status);
        kafka.bootstrap_server_host = Some("my-kafka.example.com".to_string());
        kafka.sso_client_id = Some("id".to_string());
        kafka.sso_client_secret = Some("secret".to_string());
        kafka
    }

    #[rstest]
    #[case::fleetshard_sync_disabled(provisioned(KafkaStatus::Deprovision), false, true, true)]
    #[case::fully_provisioned(provisioned(KafkaStatus::Deprovision), true, true, false)]
    #[case::no_bootstrap_host(kafka_in(KafkaStatus::Deprovision), true, false, true)]
    #[case::missing_sso_with_auth(KafkaRequest { sso_client_secret: None, ..provisioned(KafkaStatus::Deprovision) }, true, true, true)]
    #[case::missing_sso_without_auth(KafkaRequest { sso_client_secret: None, ..provisioned(KafkaStatus::Deprovision) }, true, false, false)]
    fn deprovision_sweep(
        #[case] kafka: KafkaRequest,
        #[case] fleetshard_sync: bool,
        #[case] authentication: bool,
        #[case] expected: bool,
    ) {
        let (worker, _) = worker(Arc::default(), Arc::default(), fleetshard_sync, authentication);
        assert_eq!(worker.is_sweepable(&kafka), expected);
    }

    #[tokio::test]
    async fn deletes_and_releases_quota() {
        let mut deleting = kafka_in(KafkaStatus::Deleting);
        deleting.subscription_id = Some("sub-1".to_string());
        deleting.quota_type = QuotaType::Ams;
        let deleted = kafka_in(KafkaStatus::Deleted);
        let waiting = provisioned(KafkaStatus::Deprovision);
        let ready = kafka_in(KafkaStatus::Ready);
        let kafkas = Arc::new(InMemoryKafkaService::new([
            deleting.clone(),
            deleted.clone(),
            waiting.clone(),
            ready.clone(),
        ]));
        let quota = Arc::new(RecordingQuota::default());
        let (worker, metrics) = worker(kafkas.clone(), quota.clone(), true, false);

        assert!(worker.reconcile().await.is_empty());

        assert!(kafkas.snapshot(deleting.id).is_none());
        assert!(kafkas.snapshot(deleted.id).is_none());
        assert!(kafkas.snapshot(waiting.id).is_some());
        assert!(kafkas.snapshot(ready.id).is_some());
        assert_eq!(*quota.released.lock(), vec!["sub-1".to_string()]);
        assert_eq!(metrics.successes(KafkaOperation::Delete), 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_batch() {
        let mut stuck = kafka_in(KafkaStatus::Deleting);
        stuck.subscription_id = Some("broken".to_string());
        let mut fine = kafka_in(KafkaStatus::Deleting);
        fine.subscription_id = Some("sub-2".to_string());
        let kafkas = Arc::new(InMemoryKafkaService::new([stuck.clone(), fine.clone()]));
        let quota = Arc::new(RecordingQuota {
            fail_for: Some("broken"),
            ..Default::default()
        });
        let (worker, metrics) = worker(kafkas.clone(), quota, true, false);

        let errors = worker.reconcile().await;

        assert_eq!(errors.len(), 1);
        assert!(kafkas.snapshot(stuck.id).is_some());
        assert!(kafkas.snapshot(fine.id).is_none());
        assert_eq!(metrics.total(KafkaOperation::Delete), 2);
        assert_eq!(metrics.successes(KafkaOperation::Delete), 1);
    }
}
