use super::{BillingModelDetails, ResolverContext, cloud_accounts, has_sufficient_quota, marketplace_billing_model_for_cloud_provider};
use crate::clients::ams::QuotaCost;
use crate::db::models::kafkas::KafkaRequest;
use crate::errors::{Result, ServiceError};
use crate::instance_types::{KafkaBillingModel, MARKETPLACE_AMS_BILLING_MODEL, MARKETPLACE_BILLING_MODEL};

/// Bill the marketplace the requested cloud account belongs to
pub(super) async fn resolve(ctx: &ResolverContext<'_>, kafka: &mut KafkaRequest) -> Result<BillingModelDetails> {
    let billing_model = ctx
        .instance_types
        .get_billing_model_by_id(&kafka.instance_type, MARKETPLACE_BILLING_MODEL)?
        .clone();

    resolve_for_billing_model(ctx, kafka, billing_model).await
}

/// Resolve against `billing_model`, whose supported labels may have been narrowed by the caller
pub(super) async fn resolve_for_billing_model(
    ctx: &ResolverContext<'_>,
    kafka: &mut KafkaRequest,
    billing_model: KafkaBillingModel,
) -> Result<BillingModelDetails> {
    let size = ctx.instance_size(kafka)?;
    let quota_costs = ctx.quota_costs_for(&billing_model).await?;

    let cloud_account_id = kafka.billing_cloud_account_id().unwrap_or_default().to_string();
    let marketplace = kafka.marketplace().map(str::to_string);

    let account = cloud_accounts(&quota_costs)
        .into_iter()
        .find(|account| {
            account.cloud_account_id == cloud_account_id
                && marketplace.as_deref().is_none_or(|m| account.cloud_provider_id == m)
        })
        .cloned()
        .ok_or_else(|| match &marketplace {
            Some(marketplace) => ServiceError::insufficient_quota(format!(
                "we could not find a cloud account with id '{cloud_account_id}' in marketplace '{marketplace}'"
            )),
            None => ServiceError::insufficient_quota(format!("we could not find a cloud account with id '{cloud_account_id}'")),
        })?;

    if !has_sufficient_marketplace_quota(&quota_costs, size.quota_consumed) {
        return Err(ServiceError::insufficient_quota(format!(
            "no marketplace quota available for billing model '{}'",
            billing_model.id
        )));
    }

    kafka.marketplace = Some(account.cloud_provider_id.clone());

    let ams_billing_model = marketplace_billing_model_for_cloud_provider(&account.cloud_provider_id)?;
    if !billing_model.has_support_for_ams_billing_model(ams_billing_model) {
        return Err(ServiceError::insufficient_quota(format!(
            "ams billing model '{ams_billing_model}' is not supported by billing model '{}'. Supported ams billing models are {:?}",
            billing_model.id, billing_model.ams_billing_models
        )));
    }

    Ok(BillingModelDetails {
        kafka_billing_model: billing_model,
        ams_billing_model: ams_billing_model.to_string(),
    })
}

fn has_sufficient_marketplace_quota(quota_costs: &[QuotaCost], required: i64) -> bool {
    quota_costs.iter().any(|qc| {
        qc.related_resources.iter().any(|rr| {
            rr.billing_model.to_ascii_lowercase().starts_with(MARKETPLACE_AMS_BILLING_MODEL)
                && has_sufficient_quota(qc, rr, required)
        })
    })
}
