use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::ClusterConfig;
use crate::db::models::kafkas::{KafkaRequest, KafkaStatus};
use crate::errors::{Result, ServiceError};
use crate::services::sso::SsoProvider;

/// Longest name prefix kept in a bootstrap host label
const MAX_NAME_IN_HOST: usize = 32;

/// Readies a request that has a cluster assigned for provisioning.
///
/// Implementations update `kafka` in place and leave persisting it to the caller. Client-class errors are terminal for
/// the request, server-class errors are retried.
#[async_trait]
pub trait KafkaPreparer: Send + Sync {
    async fn prepare(&self, kafka: &mut KafkaRequest) -> Result<()>;
}

/// Derives the bootstrap host from the assigned cluster's DNS domain and registers an SSO client when kafka
/// authentication is enabled
pub struct DefaultKafkaPreparer {
    clusters: Vec<ClusterConfig>,
    sso: Option<Arc<dyn SsoProvider>>,
}

impl DefaultKafkaPreparer {
    /// `sso` is `None` when kafka instances do not require authentication
    pub fn new(clusters: Vec<ClusterConfig>, sso: Option<Arc<dyn SsoProvider>>) -> Self {
        Self { clusters, sso }
    }
}

fn bootstrap_server_host(kafka: &KafkaRequest, dns_domain: &str) -> String {
    let name: String = kafka
        .name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(MAX_NAME_IN_HOST)
        .collect();
    let id = kafka.id.simple().to_string();
    format!("{}-{}.kafka.{}", name.trim_matches('-'), &id[..8], dns_domain)
}

#[async_trait]
impl KafkaPreparer for DefaultKafkaPreparer {
    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id), err)]
    async fn prepare(&self, kafka: &mut KafkaRequest) -> Result<()> {
        let cluster_id = kafka
            .cluster_id
            .clone()
            .ok_or_else(|| ServiceError::bad_request("kafka request has no cluster assigned"))?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)
            .ok_or_else(|| ServiceError::bad_request(format!("cluster '{cluster_id}' is not configured")))?;

        if !kafka.has_bootstrap_server_host() {
            kafka.bootstrap_server_host = Some(bootstrap_server_host(kafka, &cluster.dns_domain));
        }

        if let Some(sso) = &self.sso
            && !kafka.has_sso_credentials()
        {
            let credentials = sso.register_kafka_client(kafka).await.map_err(|e| {
                ServiceError::failed_to_create_sso_client(e, format!("failed to create sso client for kafka '{}'", kafka.id))
            })?;
            kafka.sso_client_id = Some(credentials.client_id);
            kafka.sso_client_secret = Some(credentials.client_secret);
        }

        debug!(bootstrap_server_host = ?kafka.bootstrap_server_host, "Prepared kafka request");
        kafka.status = KafkaStatus::Provisioning;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::services::placement::tests::cluster;
    use crate::services::sso::tests::StubSsoProvider;

    fn assigned() -> KafkaRequest {
        let mut kafka = KafkaRequest::new("My_Kafka", "owner", "org", "standard", "x1");
        kafka.cluster_id = Some("c1".to_string());
        kafka.status = KafkaStatus::Preparing;
        kafka
    }

    #[tokio::test]
    async fn sets_bootstrap_host_and_moves_to_provisioning() {
        let preparer = DefaultKafkaPreparer::new(vec![cluster("c1", "us-east-1", 5)], None);
        let mut kafka = assigned();

        preparer.prepare(&mut kafka).await.unwrap();

        let host = kafka.bootstrap_server_host.clone().unwrap();
        assert!(host.starts_with("my-kafka-"), "{host}");
        assert!(host.ends_with(".kafka.c1.example.com"), "{host}");
        assert_eq!(kafka.status, KafkaStatus::Provisioning);
        assert!(!kafka.has_sso_credentials());
    }

    #[tokio::test]
    async fn registers_sso_client_when_authentication_is_enabled() {
        let sso = Arc::new(StubSsoProvider::default());
        let preparer = DefaultKafkaPreparer::new(vec![cluster("c1", "us-east-1", 5)], Some(sso.clone()));
        let mut kafka = assigned();

        preparer.prepare(&mut kafka).await.unwrap();

        assert!(kafka.has_sso_credentials());
        assert_eq!(*sso.registered.lock(), vec![kafka.id]);
    }

    #[tokio::test]
    async fn sso_failure_is_a_server_error() {
        let sso = Arc::new(StubSsoProvider {
            fail: true,
            ..Default::default()
        });
        let preparer = DefaultKafkaPreparer::new(vec![cluster("c1", "us-east-1", 5)], Some(sso));
        let mut kafka = assigned();

        let err = preparer.prepare(&mut kafka).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::FailedToCreateSsoClient);
        assert!(err.is_server_error_class());
        assert_eq!(kafka.status, KafkaStatus::Preparing);
    }

    #[tokio::test]
    async fn unknown_cluster_is_a_client_error() {
        let preparer = DefaultKafkaPreparer::new(vec![], None);
        let err = preparer.prepare(&mut assigned()).await.unwrap_err();
        assert!(err.is_client_error_class());
    }
}
