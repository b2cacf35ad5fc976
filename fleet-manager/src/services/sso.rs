//! SSO client registration for kafka instances that require authentication.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;
use uuid::Uuid;

use crate::clients::ensure_slash;
use crate::config::KeycloakConfig;
use crate::db::models::kafkas::KafkaRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[async_trait]
pub trait SsoProvider: Send + Sync {
    /// Create the client kafka brokers use to validate tokens, returning its credentials
    async fn register_kafka_client(&self, kafka: &KafkaRequest) -> anyhow::Result<SsoCredentials>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// [`SsoProvider`] backed by the Keycloak admin API.
///
/// Authenticates with the client-credentials flow on every registration; registrations are rare enough that tokens are
/// not cached.
pub struct KeycloakSsoProvider {
    client: Client,
    base_url: Url,
    realm: String,
    client_id: String,
    client_secret: String,
}

impl KeycloakSsoProvider {
    pub fn from_config(config: &KeycloakConfig, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| anyhow!("keycloak.base_url is not configured"))?;
        let client_id = config.client_id.clone().ok_or_else(|| anyhow!("keycloak.client_id is not configured"))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or_else(|| anyhow!("keycloak.client_secret is not configured"))?;
        let client = Client::builder().timeout(timeout).build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: ensure_slash(&base_url),
            realm: config.realm.clone(),
            client_id,
            client_secret,
        })
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let url = self
            .base_url
            .join(&format!("realms/{}/protocol/openid-connect/token", self.realm))
            .context("Failed to construct token URL")?;
        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to obtain SSO token: {} - {}", status, body));
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

/// Client id registered for a kafka instance
fn kafka_client_id(kafka: &KafkaRequest) -> String {
    format!("kafka-{}", kafka.id.simple())
}

#[async_trait]
impl SsoProvider for KeycloakSsoProvider {
    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id), err)]
    async fn register_kafka_client(&self, kafka: &KafkaRequest) -> anyhow::Result<SsoCredentials> {
        let token = self.access_token().await?;
        let url = self
            .base_url
            .join(&format!("admin/realms/{}/clients", self.realm))
            .context("Failed to construct client registration URL")?;

        let credentials = SsoCredentials {
            client_id: kafka_client_id(kafka),
            client_secret: Uuid::new_v4().to_string(),
        };
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({
                "clientId": credentials.client_id,
                "name": kafka.name,
                "secret": credentials.client_secret,
                "enabled": true,
                "serviceAccountsEnabled": true,
                "standardFlowEnabled": false,
                "attributes": { "owner": kafka.owner, "organisation_id": kafka.organisation_id },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to register SSO client: {} - {}", status, body));
        }

        info!(client_id = %credentials.client_id, "Registered SSO client");
        Ok(credentials)
    }
}
