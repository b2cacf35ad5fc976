use anyhow::Context;
use async_trait::async_trait;
use bon::Builder;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::Reconciler;
use crate::config::QuotaType;
use crate::db::models::kafkas::{KafkaRequest, KafkaStatus};
use crate::errors::ErrorCode;
use crate::instance_types::SupportedKafkaInstanceTypes;
use crate::locks::DistributedLockMgr;
use crate::metrics::{KafkaMetrics, KafkaOperation};
use crate::services::{kafka::KafkaService, placement::ClusterPlacementStrategy, quota::QuotaServiceFactory};

/// Serialises cluster placement across replicas so capacity checks and assignments do not interleave
pub const CLUSTER_PLACEMENT_LOCK: &str = "cluster-placement";

/// Assigns accepted requests to a cluster, reserves their quota and hands them to preparation
#[derive(Builder)]
pub struct AcceptedKafkaManager {
    kafkas: Arc<dyn KafkaService>,
    placement: Arc<dyn ClusterPlacementStrategy>,
    quota_services: QuotaServiceFactory,
    locks: Arc<DistributedLockMgr>,
    metrics: Arc<dyn KafkaMetrics>,
    instance_types: Arc<SupportedKafkaInstanceTypes>,
    #[builder(default = true)]
    enable_quota_service: bool,
    /// Backend new requests are admitted with. Recorded on the request so its quota is released the same way.
    #[builder(default)]
    quota_type: QuotaType,
}

impl AcceptedKafkaManager {
    /// Assign a cluster under the placement lock. `false` when no cluster has room.
    async fn assign_cluster(&self, kafka: &mut KafkaRequest) -> anyhow::Result<bool> {
        self.locks.lock(CLUSTER_PLACEMENT_LOCK).await?;

        let assigned = async {
            let Some(cluster) = self.placement.find_cluster(kafka).await? else {
                return anyhow::Ok(false);
            };
            kafka.cluster_id = Some(cluster.cluster_id);
            self.kafkas.update(kafka).await?;
            Ok(true)
        }
        .await;

        let unlocked = self.locks.unlock(CLUSTER_PLACEMENT_LOCK).await;
        let assigned = assigned?;
        unlocked?;
        Ok(assigned)
    }

    async fn reserve_quota(&self, kafka: &mut KafkaRequest) -> anyhow::Result<()> {
        kafka.quota_type = self.quota_type;
        let quota_service = self.quota_services.get_quota_service(kafka.quota_type)?;

        match quota_service.reserve_quota(kafka).await {
            Ok(subscription_id) => {
                kafka.subscription_id = subscription_id;
                Ok(())
            }
            Err(e) => {
                warn!(kafka_id = %kafka.id, "Failed to reserve quota: {}", e);
                kafka.mark_failed(e.reason.clone());
                self.kafkas
                    .update(kafka)
                    .await
                    .with_context(|| format!("failed to persist failed kafka request {}", kafka.id))?;

                if matches!(e.code, ErrorCode::InsufficientQuota | ErrorCode::MaxAllowedInstanceReached) {
                    self.metrics.increment_insufficient_quota(&kafka.id.to_string());
                }
                let since_created = (Utc::now() - kafka.created_at).to_std().unwrap_or_default();
                self.metrics.observe_creation_duration(KafkaStatus::Failed, since_created);
                self.metrics.increment_operations_total(KafkaOperation::Create);

                Err(anyhow::Error::new(e).context("failed to reserve quota"))
            }
        }
    }

    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id), err)]
    async fn reconcile_accepted_kafka(&self, kafka: &mut KafkaRequest) -> anyhow::Result<()> {
        if !self.assign_cluster(kafka).await? {
            debug!("No cluster available, will retry");
            return Ok(());
        }

        if self.enable_quota_service && !kafka.has_subscription() {
            self.reserve_quota(kafka).await?;
        }

        if kafka.expires_at.is_none() {
            let size = self.instance_types.get_kafka_instance_size(&kafka.instance_type, &kafka.size_id)?;
            if let Some(lifespan) = size.lifespan {
                kafka.expires_at = Some(kafka.created_at + chrono::Duration::from_std(lifespan)?);
            }
        }

        kafka.status = KafkaStatus::Preparing;
        self.kafkas.update(kafka).await?;
        info!(cluster_id = ?kafka.cluster_id, "Kafka request accepted");
        Ok(())
    }
}

#[async_trait]
impl Reconciler for AcceptedKafkaManager {
    fn name(&self) -> &'static str {
        "accepted_kafka"
    }

    async fn reconcile(&self) -> Vec<anyhow::Error> {
        let accepted = match self.kafkas.list_by_status(&[KafkaStatus::Accepted]).await {
            Ok(accepted) => accepted,
            Err(e) => return vec![anyhow::Error::new(e).context("failed to list accepted kafkas")],
        };

        let mut errors = Vec::new();
        for mut kafka in accepted {
            if let Err(e) = self.reconcile_accepted_kafka(&mut kafka).await {
                errors.push(e.context(format!("failed to reconcile accepted kafka {}", kafka.id)));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::errors::{Result, ServiceError};
    use crate::locks::MemoryLockFactory;
    use crate::metrics::tests::RecordingKafkaMetrics;
    use crate::services::kafka::InMemoryKafkaService;
    use crate::services::placement::tests::cluster;
    use crate::services::quota::QuotaService;
    use crate::workers::tests::kafka_in;
    use uuid::Uuid;

    struct FixedPlacement(Option<ClusterConfig>);

    #[async_trait]
    impl ClusterPlacementStrategy for FixedPlacement {
        async fn find_cluster(&self, _: &KafkaRequest) -> Result<Option<ClusterConfig>> {
            Ok(self.0.clone())
        }
    }

    enum Reservation {
        Granted(&'static str),
        Denied,
    }

    struct StubQuota(Reservation);

    #[async_trait]
    impl QuotaService for StubQuota {
        async fn check_if_quota_is_defined_for_instance_type(&self, _: &KafkaRequest, _: &str) -> Result<bool> {
            Ok(true)
        }

        async fn reserve_quota(&self, kafka: &mut KafkaRequest) -> Result<Option<String>> {
            match self.0 {
                Reservation::Granted(subscription) => {
                    kafka.actual_kafka_billing_model = Some("standard".to_string());
                    Ok(Some(subscription.to_string()))
                }
                Reservation::Denied => Err(ServiceError::insufficient_quota("no quota left")),
            }
        }

        async fn delete_quota(&self, _: Option<&str>) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        kafkas: Arc<InMemoryKafkaService>,
        metrics: Arc<RecordingKafkaMetrics>,
        locks: Arc<DistributedLockMgr>,
        worker: AcceptedKafkaManager,
    }

    fn fixture(kafka: KafkaRequest, cluster: Option<ClusterConfig>, reservation: Reservation) -> Fixture {
        let kafkas = Arc::new(InMemoryKafkaService::new([kafka]));
        let metrics = Arc::new(RecordingKafkaMetrics::default());
        let locks = Arc::new(DistributedLockMgr::new(Arc::new(MemoryLockFactory::new())));
        let quota = Arc::new(StubQuota(reservation));
        let worker = AcceptedKafkaManager::builder()
            .kafkas(kafkas.clone())
            .placement(Arc::new(FixedPlacement(cluster)))
            .quota_services(QuotaServiceFactory::new(Some(quota.clone()), quota))
            .locks(locks.clone())
            .metrics(metrics.clone())
            .instance_types(Arc::new(SupportedKafkaInstanceTypes::default()))
            .build();
        Fixture {
            kafkas,
            metrics,
            locks,
            worker,
        }
    }

    fn stored(fixture: &Fixture, id: Uuid) -> KafkaRequest {
        fixture.kafkas.snapshot(id).unwrap()
    }

    #[tokio::test]
    async fn no_cluster_leaves_request_untouched() {
        let kafka = kafka_in(KafkaStatus::Accepted);
        let fixture = fixture(kafka.clone(), None, Reservation::Granted("sub-1"));

        assert!(fixture.worker.reconcile().await.is_empty());

        let stored = stored(&fixture, kafka.id);
        assert_eq!(stored.status, KafkaStatus::Accepted);
        assert_eq!(stored.cluster_id, None);
        assert_eq!(fixture.locks.registered(CLUSTER_PLACEMENT_LOCK), 0);
    }

    #[tokio::test]
    async fn assigns_cluster_reserves_quota_and_moves_to_preparing() {
        let kafka = kafka_in(KafkaStatus::Accepted);
        let fixture = fixture(kafka.clone(), Some(cluster("c1", "us-east-1", 5)), Reservation::Granted("sub-1"));

        assert!(fixture.worker.reconcile().await.is_empty());

        let stored = stored(&fixture, kafka.id);
        assert_eq!(stored.status, KafkaStatus::Preparing);
        assert_eq!(stored.cluster_id.as_deref(), Some("c1"));
        assert_eq!(stored.subscription_id.as_deref(), Some("sub-1"));
        assert_eq!(stored.actual_kafka_billing_model.as_deref(), Some("standard"));
        assert_eq!(stored.expires_at, None);
    }

    #[tokio::test]
    async fn existing_subscription_is_not_reserved_again() {
        let mut kafka = kafka_in(KafkaStatus::Accepted);
        kafka.subscription_id = Some("existing".to_string());
        let fixture = fixture(kafka.clone(), Some(cluster("c1", "us-east-1", 5)), Reservation::Denied);

        assert!(fixture.worker.reconcile().await.is_empty());

        let stored = stored(&fixture, kafka.id);
        assert_eq!(stored.status, KafkaStatus::Preparing);
        assert_eq!(stored.subscription_id.as_deref(), Some("existing"));
    }

    #[tokio::test]
    async fn denied_quota_fails_the_request() {
        let kafka = kafka_in(KafkaStatus::Accepted);
        let fixture = fixture(kafka.clone(), Some(cluster("c1", "us-east-1", 5)), Reservation::Denied);

        let errors = fixture.worker.reconcile().await;
        assert_eq!(errors.len(), 1);

        let stored = stored(&fixture, kafka.id);
        assert_eq!(stored.status, KafkaStatus::Failed);
        assert_eq!(stored.failed_reason.as_deref(), Some("Insufficient quota: no quota left"));
        assert_eq!(*fixture.metrics.insufficient_quota.lock(), vec![kafka.id.to_string()]);
        assert_eq!(fixture.metrics.total(KafkaOperation::Create), 1);
    }

    #[tokio::test]
    async fn eval_instances_get_an_expiry() {
        let mut kafka = kafka_in(KafkaStatus::Accepted);
        kafka.instance_type = "eval".to_string();
        kafka.quota_type = QuotaType::QuotaManagementList;
        let fixture = fixture(kafka.clone(), Some(cluster("c1", "us-east-1", 5)), Reservation::Granted("sub-1"));

        assert!(fixture.worker.reconcile().await.is_empty());

        let stored = stored(&fixture, kafka.id);
        assert_eq!(stored.expires_at, Some(kafka.created_at + chrono::Duration::hours(48)));
    }

    #[tokio::test]
    async fn disabled_quota_service_skips_reservation() {
        let kafka = kafka_in(KafkaStatus::Accepted);
        let kafkas = Arc::new(InMemoryKafkaService::new([kafka.clone()]));
        let quota = Arc::new(StubQuota(Reservation::Denied));
        let worker = AcceptedKafkaManager::builder()
            .kafkas(kafkas.clone())
            .placement(Arc::new(FixedPlacement(Some(cluster("c1", "us-east-1", 5)))))
            .quota_services(QuotaServiceFactory::new(None, quota))
            .locks(Arc::new(DistributedLockMgr::new(Arc::new(MemoryLockFactory::new()))))
            .metrics(Arc::new(RecordingKafkaMetrics::default()))
            .instance_types(Arc::new(SupportedKafkaInstanceTypes::default()))
            .enable_quota_service(false)
            .build();

        assert!(worker.reconcile().await.is_empty());
        assert_eq!(kafkas.snapshot(kafka.id).unwrap().status, KafkaStatus::Preparing);
    }

    #[tokio::test]
    async fn reserves_through_the_configured_quota_type() {
        let kafka = kafka_in(KafkaStatus::Accepted);
        assert_eq!(kafka.quota_type, QuotaType::QuotaManagementList);

        let kafkas = Arc::new(InMemoryKafkaService::new([kafka.clone()]));
        let worker = AcceptedKafkaManager::builder()
            .kafkas(kafkas.clone())
            .placement(Arc::new(FixedPlacement(Some(cluster("c1", "us-east-1", 5)))))
            .quota_services(QuotaServiceFactory::new(
                Some(Arc::new(StubQuota(Reservation::Granted("ams-subscription")))),
                Arc::new(StubQuota(Reservation::Denied)),
            ))
            .locks(Arc::new(DistributedLockMgr::new(Arc::new(MemoryLockFactory::new()))))
            .metrics(Arc::new(RecordingKafkaMetrics::default()))
            .instance_types(Arc::new(SupportedKafkaInstanceTypes::default()))
            .quota_type(QuotaType::Ams)
            .build();

        assert!(worker.reconcile().await.is_empty());

        let stored = kafkas.snapshot(kafka.id).unwrap();
        assert_eq!(stored.status, KafkaStatus::Preparing);
        assert_eq!(stored.subscription_id.as_deref(), Some("ams-subscription"));
        assert_eq!(stored.quota_type, QuotaType::Ams);
    }
}
