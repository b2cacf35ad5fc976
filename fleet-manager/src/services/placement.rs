use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::ClusterConfig;
use crate::db::models::kafkas::KafkaRequest;
use crate::errors::Result;
use crate::services::kafka::KafkaService;

/// Chooses the data plane cluster a kafka request is provisioned on
#[async_trait]
pub trait ClusterPlacementStrategy: Send + Sync {
    /// `None` when no cluster can take the request right now
    async fn find_cluster(&self, kafka: &KafkaRequest) -> Result<Option<ClusterConfig>>;
}

/// Places requests on the first configured cluster in the requested provider and region that still has room
pub struct StaticClusterPlacement {
    clusters: Vec<ClusterConfig>,
    kafkas: Arc<dyn KafkaService>,
}

impl StaticClusterPlacement {
    pub fn new(clusters: Vec<ClusterConfig>, kafkas: Arc<dyn KafkaService>) -> Self {
        Self { clusters, kafkas }
    }
}

#[async_trait]
impl ClusterPlacementStrategy for StaticClusterPlacement {
    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id), err)]
    async fn find_cluster(&self, kafka: &KafkaRequest) -> Result<Option<ClusterConfig>> {
        let candidates = self
            .clusters
            .iter()
            .filter(|c| c.cloud_provider == kafka.cloud_provider && c.region == kafka.region);

        for cluster in candidates {
            let placed = self.kafkas.count_by_cluster(&cluster.cluster_id).await?;
            if placed < cluster.max_kafka_instances {
                return Ok(Some(cluster.clone()));
            }
            debug!(cluster_id = %cluster.cluster_id, placed, "Cluster is full");
        }

        Ok(None)
    }
}
