use anyhow::Context;
use async_trait::async_trait;
use bon::Builder;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use super::Reconciler;
use crate::db::models::kafkas::{KafkaRequest, KafkaStatus};
use crate::errors::ServiceError;
use crate::metrics::{KafkaMetrics, KafkaOperation};
use crate::services::{kafka::KafkaService, preparer::KafkaPreparer};

/// Runs the preparation step for requests with a cluster assigned.
///
/// Client-class failures fail the request straight away. Server-class failures are retried on later passes until the
/// request is older than `max_duration_with_provisioning_errs`.
#[derive(Builder)]
pub struct PreparingKafkaManager {
    kafkas: Arc<dyn KafkaService>,
    preparer: Arc<dyn KafkaPreparer>,
    metrics: Arc<dyn KafkaMetrics>,
    #[builder(default = Duration::from_secs(5 * 60))]
    max_duration_with_provisioning_errs: Duration,
}

impl PreparingKafkaManager {
    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id), err)]
    async fn reconcile_preparing_kafka(&self, kafka: &KafkaRequest) -> anyhow::Result<()> {
        let mut prepared = kafka.clone();
        match self.preparer.prepare(&mut prepared).await {
            Ok(()) => {
                self.kafkas.update(&prepared).await?;
                Ok(())
            }
            Err(e) => self.handle_preparation_error(kafka.clone(), e).await,
        }
    }

    async fn handle_preparation_error(&self, mut kafka: KafkaRequest, error: ServiceError) -> anyhow::Result<()> {
        let since_created = (Utc::now() - kafka.created_at).to_std().unwrap_or_default();

        if error.is_server_error_class() && since_created < self.max_duration_with_provisioning_errs {
            return Err(anyhow::Error::new(error).context(format!("failed to prepare kafka {}, will retry", kafka.id)));
        }

        warn!(kafka_id = %kafka.id, "Kafka preparation failed: {}", error);
        kafka.mark_failed(error.reason.clone());
        self.kafkas
            .update(&kafka)
            .await
            .with_context(|| format!("failed to persist failed kafka request {}", kafka.id))?;
        self.metrics.observe_creation_duration(KafkaStatus::Failed, since_created);
        self.metrics.increment_operations_total(KafkaOperation::Create);

        Err(anyhow::Error::new(error).context(format!("failed to prepare kafka {}", kafka.id)))
    }
}

#[async_trait]
impl Reconciler for PreparingKafkaManager {
    fn name(&self) -> &'static str {
        "preparing_kafka"
    }

    async fn reconcile(&self) -> Vec<anyhow::Error> {
        let preparing = match self.kafkas.list_by_status(&[KafkaStatus::Preparing]).await {
            Ok(preparing) => preparing,
            Err(e) => return vec![anyhow::Error::new(e).context("failed to list preparing kafkas")],
        };

        let mut errors = Vec::new();
        for kafka in &preparing {
            if let Err(e) = self.reconcile_preparing_kafka(kafka).await {
                errors.push(e);
            }
        }
        errors
    }
}
