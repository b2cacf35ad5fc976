use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

use super::{
    QuotaService,
    billing::{ResolverContext, resolve_billing_model},
    cost_cache::QuotaCostCache,
};
use crate::clients::ams::{AmsClient, ClusterAuthorizationRequest, ReservedResource};
use crate::db::models::kafkas::KafkaRequest;
use crate::errors::{Result, ServiceError};
use crate::instance_types::SupportedKafkaInstanceTypes;

/// Quota backed by the entitlement system: every kafka instance holds a subscription reserved through a cluster
/// authorization.
pub struct AmsQuotaService {
    client: Arc<dyn AmsClient>,
    instance_types: Arc<SupportedKafkaInstanceTypes>,
}

impl AmsQuotaService {
    pub fn new(client: Arc<dyn AmsClient>, instance_types: Arc<SupportedKafkaInstanceTypes>) -> Self {
        Self { client, instance_types }
    }

    async fn organisation_id(&self, external_id: &str) -> Result<String> {
        self.client
            .get_organisation_id_from_external_id(external_id)
            .await
            .map_err(|e| {
                ServiceError::general_with_cause(
                    e,
                    format!("Error checking quota: failed to get organization with external id {external_id}"),
                )
            })
    }
}

#[async_trait]
impl QuotaService for AmsQuotaService {
    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id), err)]
    async fn check_if_quota_is_defined_for_instance_type(&self, kafka: &KafkaRequest, instance_type: &str) -> Result<bool> {
        let organisation_id = self.organisation_id(&kafka.organisation_id).await?;
        let instance_type = self.instance_types.get_kafka_instance_type_by_id(instance_type)?;
        let quota_costs = QuotaCostCache::new(self.client.clone());

        for billing_model in &instance_type.supported_billing_models {
            let costs = quota_costs
                .get_quota_costs_for_product(&organisation_id, &billing_model.ams_resource, &billing_model.ams_product)
                .await
                .map_err(|e| {
                    ServiceError::general_with_cause(
                        e,
                        format!(
                            "Error checking quota: failed to get assigned quota of type {} for organization with id {organisation_id}",
                            instance_type.id
                        ),
                    )
                })?;

            let assigned = costs.iter().any(|qc| {
                qc.allowed > 0
                    && qc
                        .related_resources
                        .iter()
                        .any(|rr| billing_model.has_support_for_ams_billing_model(&rr.billing_model))
            });
            if assigned {
                return Ok(true);
            }
        }

        Ok(false)
    }

    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id), err)]
    async fn reserve_quota(&self, kafka: &mut KafkaRequest) -> Result<Option<String>> {
        let organisation_id = self.organisation_id(&kafka.organisation_id).await?;

        let quota_costs = QuotaCostCache::new(self.client.clone());
        let ctx = ResolverContext {
            organisation_id: &organisation_id,
            instance_types: &self.instance_types,
            quota_costs: &quota_costs,
        };
        let details = resolve_billing_model(&ctx, kafka).await?;

        let size = self
            .instance_types
            .get_kafka_instance_size(&kafka.instance_type, &kafka.size_id)
            .map_err(|e| ServiceError::general_with_cause(e, "Error reserving quota"))?;

        let kafka_id = kafka.id.to_string();
        let request = ClusterAuthorizationRequest::builder()
            .account_username(kafka.owner.as_str())
            .cloud_provider_id(kafka.cloud_provider.as_str())
            .product_id(details.kafka_billing_model.ams_product.as_str())
            .cluster_id(kafka_id.as_str())
            .external_cluster_id(kafka_id.as_str())
            .resources(vec![
                ReservedResource::builder()
                    .resource_name(details.kafka_billing_model.ams_resource.as_str())
                    .billing_model(details.ams_billing_model.as_str())
                    .count(size.quota_consumed)
                    .build(),
            ])
            .build();

        let response = self
            .client
            .cluster_authorization(&request)
            .await
            .map_err(|e| ServiceError::general_with_cause(e, "Error reserving quota"))?;

        if !response.allowed {
            return Err(ServiceError::insufficient_quota("cluster authorization was denied"));
        }

        kafka.actual_kafka_billing_model = Some(details.kafka_billing_model.id.clone());
        let subscription_id = response.subscription_id().map(str::to_string);
        info!(
            billing_model = %details.kafka_billing_model.id,
            ams_billing_model = %details.ams_billing_model,
            ?subscription_id,
            "Reserved quota"
        );
        Ok(subscription_id)
    }

    #[instrument(skip(self), err)]
    async fn delete_quota(&self, subscription_id: Option<&str>) -> Result<()> {
        let Some(subscription_id) = subscription_id.filter(|id| !id.is_empty()) else {
            return Ok(());
        };

        self.client
            .delete_subscription(subscription_id)
            .await
            .map_err(|e| {
                let reason = format!("failed to delete the quota: {e}");
                ServiceError::general_with_cause(e, reason)
            })
    }
}
