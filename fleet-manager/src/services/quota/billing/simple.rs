use tracing::debug;

use super::{
    BillingModelDetails, ResolverContext, SUPPORTED_CLOUD_PROVIDERS, cloud_accounts, has_sufficient_quota,
    marketplace_billing_model_for_cloud_provider,
};
use crate::db::models::kafkas::KafkaRequest;
use crate::errors::{Result, ServiceError};
use crate::instance_types::{KafkaBillingModel, MARKETPLACE_AMS_BILLING_MODEL, MARKETPLACE_BILLING_MODEL};
use crate::quota_management::STANDARD_BILLING_MODEL;

/// Try the instance type's standard billing model, then its marketplace one
pub(super) async fn resolve(ctx: &ResolverContext<'_>, kafka: &mut KafkaRequest) -> Result<BillingModelDetails> {
    let candidates: Vec<KafkaBillingModel> = [STANDARD_BILLING_MODEL, MARKETPLACE_BILLING_MODEL]
        .into_iter()
        .filter_map(|id| ctx.instance_types.get_billing_model_by_id(&kafka.instance_type, id).ok())
        .cloned()
        .collect();

    resolve_candidates(ctx, kafka, &candidates).await
}

/// The first candidate with quota available wins, so earlier candidates are preferred
pub(super) async fn resolve_candidates(
    ctx: &ResolverContext<'_>,
    kafka: &mut KafkaRequest,
    candidates: &[KafkaBillingModel],
) -> Result<BillingModelDetails> {
    let size = ctx.instance_size(kafka)?;

    for candidate in candidates {
        let Some(ams_billing_model) = available_ams_billing_model(ctx, candidate, size.quota_consumed).await? else {
            debug!(billing_model = %candidate.id, "No quota available");
            continue;
        };

        let ams_billing_model = if candidate.has_support_for_marketplace() {
            resolve_marketplace_type(ctx, kafka, candidate, ams_billing_model).await?
        } else {
            ams_billing_model
        };

        return Ok(BillingModelDetails {
            kafka_billing_model: candidate.clone(),
            ams_billing_model,
        });
    }

    let tried: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
    Err(ServiceError::insufficient_quota(format!(
        "unable to resolve billing model, no quota available for {tried:?}"
    )))
}

/// Label of the first related resource with enough quota that `billing_model` accepts
async fn available_ams_billing_model(
    ctx: &ResolverContext<'_>,
    billing_model: &KafkaBillingModel,
    required: i64,
) -> Result<Option<String>> {
    let quota_costs = ctx.quota_costs_for(billing_model).await?;

    Ok(quota_costs.iter().find_map(|qc| {
        qc.related_resources
            .iter()
            .find(|rr| has_sufficient_quota(qc, rr, required) && billing_model.has_support_for_ams_billing_model(&rr.billing_model))
            .map(|rr| rr.billing_model.clone())
    }))
}

/// Narrows a generic `marketplace` label down to the marketplace of the organisation's only cloud account.
///
/// Sets the request's marketplace and billing cloud account when a single supported account is found.
async fn resolve_marketplace_type(
    ctx: &ResolverContext<'_>,
    kafka: &mut KafkaRequest,
    billing_model: &KafkaBillingModel,
    ams_billing_model: String,
) -> Result<String> {
    let quota_costs = ctx.quota_costs_for(billing_model).await?;
    let accounts = cloud_accounts(&quota_costs);

    if ams_billing_model == MARKETPLACE_AMS_BILLING_MODEL
        && let [account] = accounts.as_slice()
        && SUPPORTED_CLOUD_PROVIDERS.contains(&account.cloud_provider_id.as_str())
    {
        kafka.billing_cloud_account_id = Some(account.cloud_account_id.clone());
        kafka.marketplace = Some(account.cloud_provider_id.clone());
        return Ok(marketplace_billing_model_for_cloud_provider(&account.cloud_provider_id)?.to_string());
    }

    Ok(ams_billing_model)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{quota_cost, resolve_with, standard_kafka, with_cloud_accounts};
    use crate::errors::ErrorCode;

    #[tokio::test]
    async fn standard_is_preferred_when_both_have_quota() {
        let mut kafka = standard_kafka();
        let details = resolve_with(
            vec![quota_cost(10, 0, "marketplace", 1), quota_cost(10, 0, "standard", 1)],
            &mut kafka,
        )
        .await
        .unwrap();

        assert_eq!(details.kafka_billing_model.id, "standard");
        assert_eq!(details.ams_billing_model, "standard");
        assert_eq!(kafka.marketplace, None);
    }

    #[tokio::test]
    async fn falls_back_to_marketplace_when_standard_is_exhausted() {
        let mut kafka = standard_kafka();
        let details = resolve_with(
            vec![quota_cost(1, 1, "standard", 1), quota_cost(0, 0, "marketplace", 0)],
            &mut kafka,
        )
        .await
        .unwrap();

        assert_eq!(details.kafka_billing_model.id, "marketplace");
        assert_eq!(details.ams_billing_model, "marketplace");
    }

    #[tokio::test]
    async fn single_cloud_account_selects_the_marketplace() {
        let mut kafka = standard_kafka();
        let details = resolve_with(
            vec![with_cloud_accounts(quota_cost(0, 0, "marketplace", 0), &[("123456", "aws")])],
            &mut kafka,
        )
        .await
        .unwrap();

        assert_eq!(details.ams_billing_model, "marketplace-aws");
        assert_eq!(kafka.marketplace.as_deref(), Some("aws"));
        assert_eq!(kafka.billing_cloud_account_id.as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn several_cloud_accounts_keep_the_generic_label() {
        let mut kafka = standard_kafka();
        let details = resolve_with(
            vec![with_cloud_accounts(
                quota_cost(0, 0, "marketplace", 0),
                &[("123", "aws"), ("456", "azure")],
            )],
            &mut kafka,
        )
        .await
        .unwrap();

        assert_eq!(details.ams_billing_model, "marketplace");
        assert_eq!(kafka.marketplace, None);
        assert_eq!(kafka.billing_cloud_account_id, None);
    }

    #[tokio::test]
    async fn unsupported_provider_keeps_the_generic_label() {
        let mut kafka = standard_kafka();
        let details = resolve_with(
            vec![with_cloud_accounts(quota_cost(0, 0, "marketplace", 0), &[("123", "gcp")])],
            &mut kafka,
        )
        .await
        .unwrap();

        assert_eq!(details.ams_billing_model, "marketplace");
    }

    #[tokio::test]
    async fn no_quota_at_all_is_insufficient() {
        let mut kafka = standard_kafka();
        let err = resolve_with(vec![quota_cost(1, 1, "standard", 1)], &mut kafka).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::InsufficientQuota);
        assert!(err.reason.contains("standard"));
        assert!(err.reason.contains("marketplace"));
    }

    #[tokio::test]
    async fn unknown_size_is_a_general_error() {
        let mut kafka = standard_kafka();
        kafka.size_id = "x9".to_string();
        let err = resolve_with(vec![quota_cost(10, 0, "standard", 1)], &mut kafka).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::General);
    }
}
