use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::QuotaService;
use crate::db::models::kafkas::{EVAL_INSTANCE_TYPE, KafkaCountFilter, KafkaRequest};
use crate::errors::{Result, ServiceError};
use crate::instance_types::SupportedKafkaInstanceTypes;
use crate::quota_management::{
    DEFAULT_MAX_ALLOWED_INSTANCES, QuotaManagementListConfig, QuotaManagementListItem, STANDARD_BILLING_MODEL,
};
use crate::services::kafka::KafkaService;

/// Quota granted through the static allow-list in configuration.
///
/// Registered organisations and service accounts may create standard instances up to their limits; anyone else may
/// create a single eval instance. Nothing is reserved externally, so there is no subscription to release.
pub struct QuotaManagementListService {
    kafkas: Arc<dyn KafkaService>,
    quota_list: Arc<QuotaManagementListConfig>,
    instance_types: Arc<SupportedKafkaInstanceTypes>,
}

impl QuotaManagementListService {
    pub fn new(
        kafkas: Arc<dyn KafkaService>,
        quota_list: Arc<QuotaManagementListConfig>,
        instance_types: Arc<SupportedKafkaInstanceTypes>,
    ) -> Self {
        Self {
            kafkas,
            quota_list,
            instance_types,
        }
    }

    /// The desired billing model, else standard when granted for the instance type, else the first granted one
    fn detect_billing_model(&self, kafka: &KafkaRequest) -> Result<String> {
        if let Some(desired) = kafka.desired_kafka_billing_model() {
            return Ok(desired.to_string());
        }
        if kafka.instance_type == EVAL_INSTANCE_TYPE {
            return Ok(STANDARD_BILLING_MODEL.to_string());
        }

        let granted = if let Some(org) = self.quota_list.registered_users_per_organisation.get_by_id(&kafka.organisation_id) {
            org.granted_quota()
        } else if let Some(account) = self.quota_list.registered_service_accounts.get_by_username(&kafka.owner) {
            account.granted_quota()
        } else {
            return Err(ServiceError::insufficient_quota(format!(
                "unable to detect any valid billing model for organisation '{}' and user '{}'",
                kafka.organisation_id, kafka.owner
            )));
        };

        let quota = granted
            .into_iter()
            .find(|q| q.instance_type_id.eq_ignore_ascii_case(&kafka.instance_type))
            .ok_or_else(|| {
                ServiceError::insufficient_quota(format!("no quota assigned for instance type: {}", kafka.instance_type))
            })?;

        if kafka.marketplace().is_some() {
            return Err(ServiceError::insufficient_quota("marketplace is not supported when using the quota list"));
        }

        let billing_model = quota
            .billing_model_by_id(STANDARD_BILLING_MODEL)
            .or_else(|| quota.billing_models().into_iter().next())
            .map(|bm| bm.id)
            .unwrap_or_else(|| STANDARD_BILLING_MODEL.to_string());
        Ok(billing_model)
    }

    /// Streaming units already taken by the requests matching `filter`
    async fn consumed_capacity(&self, filter: &KafkaCountFilter, instance_type: &str) -> Result<u32> {
        let error_message = format!("failed to check kafka capacity for instance type '{instance_type}'");
        let existing = self
            .kafkas
            .list_by(filter)
            .await
            .map_err(|e| ServiceError::general_with_cause(e, error_message.clone()))?;

        let mut total = 0;
        for kafka in &existing {
            let size = self
                .instance_types
                .get_kafka_instance_size(&kafka.instance_type, &kafka.size_id)
                .map_err(|e| ServiceError::general_with_cause(e, error_message.clone()))?;
            total += size.capacity_consumed;
        }
        Ok(total)
    }
}

#[async_trait]
impl QuotaService for QuotaManagementListService {
    async fn check_if_quota_is_defined_for_instance_type(&self, kafka: &KafkaRequest, instance_type: &str) -> Result<bool> {
        let billing_model = kafka.desired_kafka_billing_model().unwrap_or(STANDARD_BILLING_MODEL);
        let org = self.quota_list.registered_users_per_organisation.get_by_id(&kafka.organisation_id);

        if let Some(org) = org.filter(|org| org.is_user_registered(&kafka.owner)) {
            return Ok(org.has_quota_configuration_for(instance_type, billing_model));
        }
        if let Some(account) = self.quota_list.registered_service_accounts.get_by_username(&kafka.owner) {
            return Ok(account.has_quota_configuration_for(instance_type, billing_model));
        }

        // users outside the list may only create eval instances
        Ok(instance_type == EVAL_INSTANCE_TYPE)
    }

    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id, owner = %kafka.owner), err)]
    async fn reserve_quota(&self, kafka: &mut KafkaRequest) -> Result<Option<String>> {
        let billing_model = self.detect_billing_model(kafka)?;
        kafka.desired_kafka_billing_model = Some(billing_model.clone());

        if !self.quota_list.enable_instance_limit_control {
            kafka.actual_kafka_billing_model = Some(billing_model);
            return Ok(None);
        }

        let username = kafka.owner.clone();
        let organisation_id = kafka.organisation_id.clone();
        let is_eval = kafka.instance_type == EVAL_INSTANCE_TYPE;

        let registered_org = self
            .quota_list
            .registered_users_per_organisation
            .get_by_id(&organisation_id)
            .filter(|org| org.is_user_registered(&username));

        let mut filter = KafkaCountFilter {
            instance_type: Some(kafka.instance_type.clone()),
            billing_model: Some(billing_model.clone()),
            ..Default::default()
        };

        let (item, message): (Option<&(dyn QuotaManagementListItem + Sync)>, String) = match registered_org {
            Some(org) => {
                if is_eval {
                    filter.owner = Some(username.clone());
                } else {
                    filter.organisation_id = Some(organisation_id.clone());
                }
                let max = org.max_allowed_instances(&kafka.instance_type, &billing_model);
                (
                    Some(org as &(dyn QuotaManagementListItem + Sync)),
                    format!("Organization '{organisation_id}' has reached a maximum number of {max} allowed instances."),
                )
            }
            None => {
                filter.owner = Some(username.clone());
                match self.quota_list.registered_service_accounts.get_by_username(&username) {
                    Some(account) => {
                        let max = account.max_allowed_instances(&kafka.instance_type, &billing_model);
                        (
                            Some(account as &(dyn QuotaManagementListItem + Sync)),
                            format!("User '{username}' has reached a maximum number of {max} allowed instances."),
                        )
                    }
                    None => (
                        None,
                        format!(
                            "User '{username}' has reached a maximum number of {DEFAULT_MAX_ALLOWED_INSTANCES} allowed instances."
                        ),
                    ),
                }
            }
        };

        let consumed = self.consumed_capacity(&filter, &kafka.instance_type).await?;
        debug!(consumed, "Counted existing instances");

        match item {
            Some(item) if !is_eval => {
                let size = self
                    .instance_types
                    .get_kafka_instance_size(&kafka.instance_type, &kafka.size_id)
                    .map_err(|e| ServiceError::general_with_cause(e, "error reserving quota"))?;
                if item.is_instance_count_within_limit(&kafka.instance_type, &billing_model, consumed + size.capacity_consumed) {
                    kafka.actual_kafka_billing_model = Some(billing_model);
                    Ok(None)
                } else {
                    Err(ServiceError::max_allowed_instance_reached(message))
                }
            }
            None if is_eval => {
                if consumed >= DEFAULT_MAX_ALLOWED_INSTANCES {
                    return Err(ServiceError::max_allowed_instance_reached(message));
                }
                kafka.actual_kafka_billing_model = Some(billing_model);
                Ok(None)
            }
            _ => Err(ServiceError::insufficient_quota("no quota available for this instance type")),
        }
    }

    async fn delete_quota(&self, _subscription_id: Option<&str>) -> Result<()> {
        Ok(())
    }
}
