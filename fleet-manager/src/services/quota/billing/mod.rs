//! Billing model resolution for entitlement-backed quota reservations.
//!
//! A kafka request names an instance type and optionally a desired billing model, a marketplace and a billing cloud
//! account. The resolvers turn that into a [`BillingModelDetails`]: the configured billing model to charge against and
//! the entitlement system label to reserve with. Resolvers are tried in the fixed order of
//! [`BillingModelResolver::CHAIN`] and the first one supporting the request handles it; [`BillingModelResolver::Simple`]
//! supports everything, so resolution never falls through.
//!
//! Resolvers may fill in `marketplace` and `billing_cloud_account_id` on the request when they detect them.

mod cloud_account;
mod explicit;
mod simple;

use crate::clients::ams::{CloudAccount, QuotaCost, RelatedResource};
use crate::db::models::kafkas::KafkaRequest;
use crate::errors::{Result, ServiceError};
use crate::instance_types::{KafkaBillingModel, KafkaInstanceSize, SupportedKafkaInstanceTypes};

use super::cost_cache::QuotaCostCache;

pub const CLOUD_PROVIDER_AWS: &str = "aws";
pub const CLOUD_PROVIDER_RHM: &str = "rhm";
pub const CLOUD_PROVIDER_AZURE: &str = "azure";

/// Marketplaces that can be detected from an organisation's cloud accounts
pub const SUPPORTED_CLOUD_PROVIDERS: [&str; 3] = [CLOUD_PROVIDER_AWS, CLOUD_PROVIDER_RHM, CLOUD_PROVIDER_AZURE];

/// Outcome of billing model resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingModelDetails {
    pub kafka_billing_model: KafkaBillingModel,
    pub ams_billing_model: String,
}

/// Everything a resolver reads besides the request itself
pub struct ResolverContext<'a> {
    /// Internal entitlement system id of the request's organisation
    pub organisation_id: &'a str,
    pub instance_types: &'a SupportedKafkaInstanceTypes,
    pub quota_costs: &'a QuotaCostCache,
}

impl ResolverContext<'_> {
    /// Size of the request, failing with a general error when the catalogue doesn't know it
    fn instance_size(&self, kafka: &KafkaRequest) -> Result<KafkaInstanceSize> {
        self.instance_types
            .get_kafka_instance_size(&kafka.instance_type, &kafka.size_id)
            .cloned()
            .map_err(|e| ServiceError::general_with_cause(e, "Error reserving quota"))
    }

    async fn quota_costs_for(&self, billing_model: &KafkaBillingModel) -> Result<std::sync::Arc<Vec<QuotaCost>>> {
        self.quota_costs
            .get_quota_costs_for_product(self.organisation_id, &billing_model.ams_resource, &billing_model.ams_product)
            .await
            .map_err(|e| {
                ServiceError::insufficient_quota(format!("{e}: error getting quotas for product {}", billing_model.ams_product))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingModelResolver {
    /// The request names its billing model
    Explicit,
    /// The request names the cloud account to bill
    CloudAccount,
    /// Anything else: pick whichever of standard or marketplace has quota
    Simple,
}

impl BillingModelResolver {
    pub const CHAIN: [BillingModelResolver; 3] = [
        BillingModelResolver::Explicit,
        BillingModelResolver::CloudAccount,
        BillingModelResolver::Simple,
    ];

    pub fn supports(&self, kafka: &KafkaRequest) -> bool {
        match self {
            BillingModelResolver::Explicit => kafka.desired_kafka_billing_model().is_some(),
            BillingModelResolver::CloudAccount => kafka.billing_cloud_account_id().is_some(),
            BillingModelResolver::Simple => true,
        }
    }

    /// The first resolver of the chain supporting `kafka`
    pub fn select(kafka: &KafkaRequest) -> Option<BillingModelResolver> {
        Self::CHAIN.into_iter().find(|resolver| resolver.supports(kafka))
    }

    pub async fn resolve(&self, ctx: &ResolverContext<'_>, kafka: &mut KafkaRequest) -> Result<BillingModelDetails> {
        match self {
            BillingModelResolver::Explicit => explicit::resolve(ctx, kafka).await,
            BillingModelResolver::CloudAccount => cloud_account::resolve(ctx, kafka).await,
            BillingModelResolver::Simple => simple::resolve(ctx, kafka).await,
        }
    }
}

/// Resolve the billing model of `kafka` with the first supporting resolver of the chain
pub async fn resolve_billing_model(ctx: &ResolverContext<'_>, kafka: &mut KafkaRequest) -> Result<BillingModelDetails> {
    let resolver = BillingModelResolver::select(kafka)
        .ok_or_else(|| ServiceError::general(format!("no billing model resolver supports kafka request '{}'", kafka.id)))?;
    tracing::debug!(kafka_id = %kafka.id, ?resolver, "Resolving billing model");
    resolver.resolve(ctx, kafka).await
}

/// A related resource carries enough quota for `required` units when it is free or the quota still has room for them
pub fn has_sufficient_quota(quota_cost: &QuotaCost, related_resource: &RelatedResource, required: i64) -> bool {
    related_resource.cost == 0 || quota_cost.consumed + required <= quota_cost.allowed
}

/// Entitlement label used to reserve marketplace quota bought through `cloud_provider`
pub fn marketplace_billing_model_for_cloud_provider(cloud_provider: &str) -> Result<&'static str> {
    match cloud_provider {
        CLOUD_PROVIDER_AWS => Ok("marketplace-aws"),
        CLOUD_PROVIDER_RHM => Ok("marketplace"),
        CLOUD_PROVIDER_AZURE => Ok("marketplace-azure"),
        other => Err(ServiceError::invalid_billing_account(format!("unsupported cloud provider '{other}'"))),
    }
}

fn cloud_accounts(quota_costs: &[QuotaCost]) -> Vec<&CloudAccount> {
    quota_costs.iter().flat_map(|qc| qc.cloud_accounts.iter()).collect()
}
