use async_trait::async_trait;
use bon::Builder;
use std::sync::Arc;
use tracing::{info, instrument};

use super::Reconciler;
use crate::db::models::kafkas::{KafkaRequest, KafkaStatus};
use crate::services::{kafka::KafkaService, sso::SsoProvider};

/// Makes sure every ready kafka has SSO credentials when kafka authentication is enabled
#[derive(Builder)]
pub struct ReadyKafkaManager {
    kafkas: Arc<dyn KafkaService>,
    /// `None` when kafka authentication is disabled
    sso: Option<Arc<dyn SsoProvider>>,
}

impl ReadyKafkaManager {
    #[instrument(skip(self, sso, kafka), fields(kafka_id = %kafka.id), err)]
    async fn reconcile_sso_credentials(&self, sso: &dyn SsoProvider, mut kafka: KafkaRequest) -> anyhow::Result<()> {
        let credentials = sso.register_kafka_client(&kafka).await?;
        kafka.sso_client_id = Some(credentials.client_id);
        kafka.sso_client_secret = Some(credentials.client_secret);
        self.kafkas.update(&kafka).await?;
        info!("Added missing SSO credentials");
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ReadyKafkaManager {
    fn name(&self) -> &'static str {
        "ready_kafka"
    }

    async fn reconcile(&self) -> Vec<anyhow::Error> {
        let Some(sso) = &self.sso else {
            return Vec::new();
        };

        let ready = match self.kafkas.list_by_status(&[KafkaStatus::Ready]).await {
            Ok(ready) => ready,
            Err(e) => return vec![anyhow::Error::new(e).context("failed to list ready kafkas")],
        };

        let mut errors = Vec::new();
        for kafka in ready.into_iter().filter(|k| !k.has_sso_credentials()) {
            let id = kafka.id;
            if let Err(e) = self.reconcile_sso_credentials(sso.as_ref(), kafka).await {
                errors.push(e.context(format!("failed to reconcile ready kafka {id}")));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kafka::InMemoryKafkaService;
    use crate::services::sso::tests::StubSsoProvider;
    use crate::workers::tests::kafka_in;

    #[tokio::test]
    async fn registers_missing_credentials_only() {
        let missing = kafka_in(KafkaStatus::Ready);
        let mut complete = kafka_in(KafkaStatus::Ready);
        complete.sso_client_id = Some("existing".to_string());
        complete.sso_client_secret = Some("secret".to_string());
        let kafkas = Arc::new(InMemoryKafkaService::new([missing.clone(), complete.clone()]));
        let sso = Arc::new(StubSsoProvider::default());

        let worker = ReadyKafkaManager::builder().kafkas(kafkas.clone()).sso(sso.clone()).build();
        assert!(worker.reconcile().await.is_empty());

        assert!(kafkas.snapshot(missing.id).unwrap().has_sso_credentials());
        assert_eq!(kafkas.snapshot(complete.id).unwrap().sso_client_id.as_deref(), Some("existing"));
        assert_eq!(*sso.registered.lock(), vec![missing.id]);
    }

    #[tokio::test]
    async fn registration_failures_are_collected() {
        let kafkas = Arc::new(InMemoryKafkaService::new([kafka_in(KafkaStatus::Ready), kafka_in(KafkaStatus::Ready)]));
        let sso = Arc::new(StubSsoProvider {
            fail: true,
            ..Default::default()
        });

        let worker = ReadyKafkaManager::builder().kafkas(kafkas).sso(sso).build();
        assert_eq!(worker.reconcile().await.len(), 2);
    }

    #[tokio::test]
    async fn disabled_authentication_does_nothing() {
        let kafka = kafka_in(KafkaStatus::Ready);
        let kafkas = Arc::new(InMemoryKafkaService::new([kafka.clone()]));

        let worker = ReadyKafkaManager::builder().kafkas(kafkas.clone()).build();
        assert!(worker.reconcile().await.is_empty());
        assert!(!kafkas.snapshot(kafka.id).unwrap().has_sso_credentials());
    }
}
