use super::{BillingModelDetails, ResolverContext, cloud_account, simple};
use crate::db::models::kafkas::KafkaRequest;
use crate::errors::{Result, ServiceError};
use crate::instance_types::{KafkaBillingModel, MARKETPLACE_AMS_BILLING_MODEL, MARKETPLACE_BILLING_MODEL};
use crate::quota_management::STANDARD_BILLING_MODEL;

/// Use the billing model the request asked for, detecting the entitlement label when it accepts several
pub(super) async fn resolve(ctx: &ResolverContext<'_>, kafka: &mut KafkaRequest) -> Result<BillingModelDetails> {
    let desired = kafka.desired_kafka_billing_model().unwrap_or_default().to_string();
    let billing_model = ctx
        .instance_types
        .get_billing_model_by_id(&kafka.instance_type, &desired)?
        .clone();

    if let Some(marketplace) = kafka.marketplace()
        && !billing_model.has_support_for_marketplace()
    {
        return Err(ServiceError::insufficient_quota(format!(
            "marketplace value '{marketplace}' is not compatible with billing model '{}'",
            billing_model.id
        )));
    }

    if let [only] = billing_model.ams_billing_models.as_slice() {
        let ams_billing_model = only.clone();
        return Ok(BillingModelDetails {
            kafka_billing_model: billing_model,
            ams_billing_model,
        });
    }

    if let Some(marketplace) = kafka.marketplace() {
        let ams_marketplace = format!("{MARKETPLACE_AMS_BILLING_MODEL}-{marketplace}");
        if billing_model.has_support_for_ams_billing_model(&ams_marketplace) {
            return Ok(BillingModelDetails {
                kafka_billing_model: billing_model,
                ams_billing_model: ams_marketplace,
            });
        }
        return Err(ServiceError::insufficient_quota(format!(
            "ams marketplace '{marketplace}' is not supported by billing model '{}'. Supported marketplaces are {:?}",
            billing_model.id, billing_model.ams_billing_models
        )));
    }

    let ams_billing_model = detect_ams_billing_model(ctx, kafka, &billing_model).await?;
    Ok(BillingModelDetails {
        kafka_billing_model: billing_model,
        ams_billing_model,
    })
}

/// Several labels and no marketplace: a cloud account narrows it to the marketplace labels, otherwise pick whichever
/// of standard and marketplace has quota
async fn detect_ams_billing_model(
    ctx: &ResolverContext<'_>,
    kafka: &mut KafkaRequest,
    billing_model: &KafkaBillingModel,
) -> Result<String> {
    if kafka.billing_cloud_account_id().is_some() {
        let marketplace_prefix = format!("{MARKETPLACE_AMS_BILLING_MODEL}-");
        let marketplace_labels: Vec<String> = billing_model
            .ams_billing_models
            .iter()
            .filter(|label| label.to_ascii_lowercase().starts_with(&marketplace_prefix))
            .cloned()
            .collect();
        if marketplace_labels.is_empty() {
            return Err(ServiceError::insufficient_quota(format!(
                "marketplace is not supported by billing model '{}'. Supported ams billing models are {:?}",
                billing_model.id, billing_model.ams_billing_models
            )));
        }

        let narrowed = KafkaBillingModel {
            ams_billing_models: marketplace_labels,
            ..billing_model.clone()
        };
        let details = cloud_account::resolve_for_billing_model(ctx, kafka, narrowed).await?;
        return Ok(details.ams_billing_model);
    }

    let mut candidates = Vec::with_capacity(2);
    if billing_model.has_support_for_standard() {
        candidates.push(KafkaBillingModel {
            id: STANDARD_BILLING_MODEL.to_string(),
            ..billing_model.restricted_to(STANDARD_BILLING_MODEL)
        });
    }
    if billing_model.has_support_for_marketplace() {
        candidates.push(KafkaBillingModel {
            id: MARKETPLACE_BILLING_MODEL.to_string(),
            ..billing_model.restricted_to(MARKETPLACE_AMS_BILLING_MODEL)
        });
    }

    let details = simple::resolve_candidates(ctx, kafka, &candidates).await?;
    Ok(details.ams_billing_model)
}
