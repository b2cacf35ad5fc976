use anyhow::Context;
use async_trait::async_trait;
use bon::Builder;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::Reconciler;
use crate::db::models::kafkas::KafkaStatus;
use crate::metrics::KafkaMetrics;
use crate::services::kafka::KafkaService;

/// Fleet-wide housekeeping: status gauges, deny-listed owners and expired instances
#[derive(Builder)]
pub struct KafkaManager {
    kafkas: Arc<dyn KafkaService>,
    metrics: Arc<dyn KafkaMetrics>,
    #[builder(default)]
    deny_list: Vec<String>,
    #[builder(default = true)]
    enable_deletion_of_expired_kafka: bool,
}

impl KafkaManager {
    async fn update_status_counts(&self) -> anyhow::Result<()> {
        let counts: HashMap<_, _> = self
            .kafkas
            .count_by_status()
            .await
            .context("failed to count kafkas by status")?
            .into_iter()
            .collect();

        // Every status is reported so gauges drop back to zero once a status empties out
        for status in KafkaStatus::ALL {
            self.metrics.set_status_count(status, counts.get(&status).copied().unwrap_or(0));
        }
        Ok(())
    }

    async fn deprovision_denied_owners(&self) -> anyhow::Result<()> {
        if self.deny_list.is_empty() {
            return Ok(());
        }
        let moved = self
            .kafkas
            .deprovision_for_owners(&self.deny_list)
            .await
            .context("failed to deprovision kafkas of denied owners")?;
        if moved > 0 {
            info!(count = moved, "Deprovisioning kafkas of denied owners");
        }
        Ok(())
    }

    async fn deprovision_expired(&self) -> anyhow::Result<()> {
        if !self.enable_deletion_of_expired_kafka {
            return Ok(());
        }
        let moved = self
            .kafkas
            .deprovision_expired(Utc::now())
            .await
            .context("failed to deprovision expired kafkas")?;
        if moved > 0 {
            info!(count = moved, "Deprovisioning expired kafkas");
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for KafkaManager {
    fn name(&self) -> &'static str {
        "kafka_manager"
    }

    async fn reconcile(&self) -> Vec<anyhow::Error> {
        [
            self.update_status_counts().await,
            self.deprovision_denied_owners().await,
            self.deprovision_expired().await,
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }
}
