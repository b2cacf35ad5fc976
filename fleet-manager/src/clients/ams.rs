//! Client for the entitlement system (AMS, the accounts management service).
//!
//! The quota services only depend on the [`AmsClient`] trait; [`HttpAmsClient`] talks to the real REST API.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use bon::Builder;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::ensure_slash;
use crate::config::AmsConfig;

/// One line of a quota cost entry, describing a resource the quota can be spent on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelatedResource {
    pub resource_name: String,
    pub resource_type: String,
    pub product: String,
    pub billing_model: String,
    pub cost: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudAccount {
    pub cloud_account_id: String,
    pub cloud_provider_id: String,
}

/// Quota an organisation holds for one product, as reported by the entitlement system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaCost {
    pub quota_id: String,
    pub allowed: i64,
    pub consumed: i64,
    pub related_resources: Vec<RelatedResource>,
    pub cloud_accounts: Vec<CloudAccount>,
}

impl QuotaCost {
    /// True when any related resource matches both `resource_name` and `product`
    pub fn matches(&self, resource_name: &str, product: &str) -> bool {
        self.related_resources
            .iter()
            .any(|rr| rr.resource_name == resource_name && rr.product == product)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct ReservedResource {
    #[builder(default = "cluster.aws".to_string(), into)]
    pub resource_type: String,
    #[builder(default = "rhosak".to_string(), into)]
    pub resource_name: String,
    #[builder(default = "marketplace".to_string(), into)]
    pub billing_model: String,
    #[builder(default = "single".to_string(), into)]
    pub availability_zone: String,
    #[builder(default = false)]
    pub byoc: bool,
    #[builder(default = 1)]
    pub count: i64,
}

/// Reservation of quota for one kafka instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct ClusterAuthorizationRequest {
    #[builder(into)]
    pub account_username: String,
    #[builder(into)]
    pub cloud_provider_id: String,
    #[builder(into)]
    pub product_id: String,
    #[builder(into)]
    pub cluster_id: String,
    #[builder(into)]
    pub external_cluster_id: String,
    #[builder(default = true)]
    pub managed: bool,
    #[builder(default = false)]
    pub byoc: bool,
    #[builder(default = false)]
    pub disconnected: bool,
    #[builder(default = "single".to_string(), into)]
    pub availability_zone: String,
    #[builder(default = true)]
    pub reserve: bool,
    pub resources: Vec<ReservedResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterAuthorizationResponse {
    pub allowed: bool,
    pub subscription: Option<SubscriptionRef>,
}

impl ClusterAuthorizationResponse {
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_ref().map(|s| s.id.as_str()).filter(|id| !id.is_empty())
    }
}

/// The calls the fleet manager makes against the entitlement system.
#[async_trait]
pub trait AmsClient: Send + Sync {
    /// Maps an organisation's external id to the entitlement system's internal id
    async fn get_organisation_id_from_external_id(&self, external_id: &str) -> anyhow::Result<String>;

    /// Quota costs of `organisation_id` having a related resource for `resource_name` and `product`
    async fn get_quota_costs_for_product(&self, organisation_id: &str, resource_name: &str, product: &str) -> anyhow::Result<Vec<QuotaCost>>;

    async fn cluster_authorization(&self, request: &ClusterAuthorizationRequest) -> anyhow::Result<ClusterAuthorizationResponse>;

    async fn delete_subscription(&self, subscription_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct OrganisationItem {
    id: String,
}

/// [`AmsClient`] over the accounts management REST API, authenticated with a bearer token.
pub struct HttpAmsClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpAmsClient {
    const API_PATH: &'static str = "api/accounts_mgmt/v1/";

    pub fn new(base_url: Url, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build().context("Failed to create HTTP client")?;
        let base_url = ensure_slash(&base_url)
            .join(Self::API_PATH)
            .context("Failed to construct accounts management URL")?;
        Ok(Self { client, base_url, token })
    }

    pub fn from_config(config: &AmsConfig) -> anyhow::Result<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| anyhow!("ams.base_url is not configured"))?;
        Self::new(base_url, config.token.clone(), config.timeout)
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to construct accounts management URL for '{path}'"))
    }

    fn authorised(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn error_for_status(response: reqwest::Response, action: &str) -> anyhow::Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%status, "Accounts management request failed: {}", action);
        Err(anyhow!("accounts management API error while trying to {}: {} - {}", action, status, body))
    }
}

#[async_trait]
impl AmsClient for HttpAmsClient {
    #[instrument(skip(self), err)]
    async fn get_organisation_id_from_external_id(&self, external_id: &str) -> anyhow::Result<String> {
        let url = self.url("organizations")?;
        let response = self
            .authorised(self.client.get(url))
            .query(&[("search", format!("external_id='{external_id}'"))])
            .send()
            .await?;
        let response = Self::error_for_status(response, "look up organisation").await?;

        let organisations: ListResponse<OrganisationItem> = response.json().await?;
        organisations
            .items
            .into_iter()
            .next()
            .map(|org| org.id)
            .ok_or_else(|| anyhow!("organisation with external_id '{external_id}' can't be found"))
    }

    #[instrument(skip(self), err)]
    async fn get_quota_costs_for_product(&self, organisation_id: &str, resource_name: &str, product: &str) -> anyhow::Result<Vec<QuotaCost>> {
        let url = self.url(&format!("organizations/{organisation_id}/quota_cost"))?;
        let response = self
            .authorised(self.client.get(url))
            .query(&[("fetchRelatedResources", "true"), ("fetchCloudAccounts", "true")])
            .send()
            .await?;
        let response = Self::error_for_status(response, "list quota costs").await?;

        let quota_costs: ListResponse<QuotaCost> = response.json().await?;
        let matching: Vec<QuotaCost> = quota_costs
            .items
            .into_iter()
            .filter(|qc| qc.matches(resource_name, product))
            .collect();
        debug!("Found {} quota costs for product {}", matching.len(), product);
        Ok(matching)
    }

    #[instrument(skip(self, request), fields(cluster_id = %request.cluster_id), err)]
    async fn cluster_authorization(&self, request: &ClusterAuthorizationRequest) -> anyhow::Result<ClusterAuthorizationResponse> {
        let url = self.url("cluster_authorizations")?;
        let response = self.authorised(self.client.post(url)).json(request).send().await?;
        let response = Self::error_for_status(response, "authorise cluster").await?;
        Ok(response.json().await?)
    }

    #[instrument(skip(self), err)]
    async fn delete_subscription(&self, subscription_id: &str) -> anyhow::Result<()> {
        let url = self.url(&format!("subscriptions/{subscription_id}"))?;
        let response = self.authorised(self.client.delete(url)).send().await?;
        // Already gone
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::error_for_status(response, "delete subscription").await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{bearer_token, body_partial_json, method, path, query_param},
    };

    /// In-process [`AmsClient`] with canned quota costs, counting lookups per product
    #[derive(Default)]
    pub(crate) struct StubAmsClient {
        pub quota_costs: HashMap<(String, String), Vec<QuotaCost>>,
        pub fail_quota_costs: bool,
        pub allowed: bool,
        pub fail_authorization: bool,
        pub fail_delete: bool,
        pub quota_cost_calls: Mutex<Vec<(String, String, String)>>,
        pub authorizations: Mutex<Vec<ClusterAuthorizationRequest>>,
        pub deleted: Mutex<Vec<String>>,
    }

    impl StubAmsClient {
        pub(crate) fn with_quota_costs(mut self, resource: &str, product: &str, costs: Vec<QuotaCost>) -> Self {
            self.quota_costs.insert((resource.to_string(), product.to_string()), costs);
            self
        }

        pub(crate) fn quota_cost_call_count(&self) -> usize {
            self.quota_cost_calls.lock().len()
        }
    }

    #[async_trait]
    impl AmsClient for StubAmsClient {
        async fn get_organisation_id_from_external_id(&self, external_id: &str) -> anyhow::Result<String> {
            Ok(format!("ams-{external_id}"))
        }

        async fn get_quota_costs_for_product(&self, organisation_id: &str, resource_name: &str, product: &str) -> anyhow::Result<Vec<QuotaCost>> {
            self.quota_cost_calls
                .lock()
                .push((organisation_id.to_string(), resource_name.to_string(), product.to_string()));
            if self.fail_quota_costs {
                return Err(anyhow!("quota cost lookup failed"));
            }
            Ok(self
                .quota_costs
                .get(&(resource_name.to_string(), product.to_string()))
                .cloned()
                .unwrap_or_default())
        }

        async fn cluster_authorization(&self, request: &ClusterAuthorizationRequest) -> anyhow::Result<ClusterAuthorizationResponse> {
            self.authorizations.lock().push(request.clone());
            if self.fail_authorization {
                return Err(anyhow!("some errors"));
            }
            Ok(ClusterAuthorizationResponse {
                allowed: self.allowed,
                subscription: self.allowed.then(|| SubscriptionRef { id: "1234".to_string() }),
            })
        }

        async fn delete_subscription(&self, subscription_id: &str) -> anyhow::Result<()> {
            if self.fail_delete {
                return Err(anyhow!("subscription delete failed"));
            }
            self.deleted.lock().push(subscription_id.to_string());
            Ok(())
        }
    }

    async fn client(server: &MockServer) -> HttpAmsClient {
        HttpAmsClient::new(
            Url::parse(&server.uri()).unwrap(),
            Some("secret-token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_organisation_by_external_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/accounts_mgmt/v1/organizations"))
            .and(query_param("search", "external_id='13640203'"))
            .and(bearer_token("secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [{"id": "1XyZ"}]})))
            .mount(&server)
            .await;

        let client = client(&server).await;
        assert_eq!(client.get_organisation_id_from_external_id("13640203").await.unwrap(), "1XyZ");
    }

    #[tokio::test]
    async fn missing_organisation_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/accounts_mgmt/v1/organizations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .mount(&server)
            .await;

        let err = client(&server).await.get_organisation_id_from_external_id("nope").await.unwrap_err();
        assert!(err.to_string().contains("can't be found"));
    }

    #[tokio::test]
    async fn quota_costs_are_filtered_by_resource_and_product() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/accounts_mgmt/v1/organizations/org-1/quota_cost"))
            .and(query_param("fetchRelatedResources", "true"))
            .and(query_param("fetchCloudAccounts", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {
                        "quota_id": "rhosak-standard",
                        "allowed": 5,
                        "consumed": 1,
                        "related_resources": [
                            {"resource_name": "rhosak", "product": "RHOSAK", "billing_model": "standard", "cost": 1}
                        ]
                    },
                    {
                        "quota_id": "other",
                        "allowed": 5,
                        "consumed": 0,
                        "related_resources": [
                            {"resource_name": "compute.node", "product": "OSD", "billing_model": "standard", "cost": 1}
                        ]
                    },
                    {
                        "quota_id": "rhosak-marketplace",
                        "allowed": 0,
                        "consumed": 0,
                        "related_resources": [
                            {"resource_name": "rhosak", "product": "RHOSAK", "billing_model": "marketplace", "cost": 0}
                        ],
                        "cloud_accounts": [{"cloud_account_id": "123", "cloud_provider_id": "aws"}]
                    }
                ]
            })))
            .mount(&server)
            .await;

        let costs = client(&server).await.get_quota_costs_for_product("org-1", "rhosak", "RHOSAK").await.unwrap();
        assert_eq!(costs.len(), 2);
        assert_eq!(costs[0].quota_id, "rhosak-standard");
        assert_eq!(costs[1].cloud_accounts[0].cloud_provider_id, "aws");
    }

    #[tokio::test]
    async fn cluster_authorization_posts_reservation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/accounts_mgmt/v1/cluster_authorizations"))
            .and(body_partial_json(json!({
                "account_username": "testUser",
                "product_id": "RHOSAK",
                "reserve": true,
                "resources": [{"resource_type": "cluster.aws", "resource_name": "rhosak", "billing_model": "standard", "count": 1}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "allowed": true,
                "subscription": {"id": "1234"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = ClusterAuthorizationRequest::builder()
            .account_username("testUser")
            .cloud_provider_id("aws")
            .product_id("RHOSAK")
            .cluster_id("kafka-1")
            .external_cluster_id("kafka-1")
            .resources(vec![ReservedResource::builder().billing_model("standard").build()])
            .build();

        let response = client(&server).await.cluster_authorization(&request).await.unwrap();
        assert!(response.allowed);
        assert_eq!(response.subscription_id(), Some("1234"));
    }

    #[tokio::test]
    async fn server_errors_surface_as_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/accounts_mgmt/v1/subscriptions/sub-1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/accounts_mgmt/v1/subscriptions/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let err = client.delete_subscription("sub-1").await.unwrap_err();
        assert!(err.to_string().contains("500"));
        client.delete_subscription("gone").await.unwrap();
    }
}
