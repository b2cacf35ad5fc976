use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::clients::ensure_slash;
use crate::db::models::kafkas::KafkaRequest;

/// Provisioning state of a kafka instance on its data plane cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KafkaState {
    Installing,
    Ready,
    Error(String),
}

/// Source of kafka state when the data plane does not report it through fleetshard sync
#[async_trait]
pub trait KafkaStateProvider: Send + Sync {
    async fn get_kafka_state(&self, kafka: &KafkaRequest) -> anyhow::Result<KafkaState>;
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    state: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Reads `GET {state_url}/kafkas/{id}/status`
pub struct HttpKafkaStateProvider {
    client: Client,
    base_url: Url,
}

impl HttpKafkaStateProvider {
    pub fn new(base_url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build().context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: ensure_slash(&base_url),
        })
    }
}

#[async_trait]
impl KafkaStateProvider for HttpKafkaStateProvider {
    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id), err)]
    async fn get_kafka_state(&self, kafka: &KafkaRequest) -> anyhow::Result<KafkaState> {
        let url = self
            .base_url
            .join(&format!("kafkas/{}/status", kafka.id))
            .context("Failed to construct kafka state URL")?;
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("data plane API error while reading kafka state: {} - {}", status, body));
        }

        let state: StateResponse = response.json().await?;
        match state.state.as_str() {
            "ready" => Ok(KafkaState::Ready),
            "installing" | "accepted" | "pending" => Ok(KafkaState::Installing),
            "error" | "failed" => Ok(KafkaState::Error(
                state.reason.unwrap_or_else(|| "kafka installation failed".to_string()),
            )),
            other => Err(anyhow!("unknown kafka state '{other}'")),
        }
    }
}
