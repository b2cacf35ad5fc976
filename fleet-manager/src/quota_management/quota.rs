use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::ExpirationDate;

pub const STANDARD_BILLING_MODEL: &str = "standard";

/// A billing model granted to an organisation or account for one instance type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BillingModel {
    pub id: String,
    /// Instances allowed under this billing model. Zero means "use the owner's limit"
    #[serde(default, alias = "allowed")]
    pub max_allowed_instances: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<ExpirationDate>,
    #[serde(default)]
    pub grace_period_days: u32,
}

impl BillingModel {
    pub fn standard() -> Self {
        Self {
            id: STANDARD_BILLING_MODEL.to_string(),
            max_allowed_instances: 0,
            expiration_date: None,
            grace_period_days: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiration_date.is_some_and(|date| date.is_expired(Utc::now()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Quota {
    pub instance_type_id: String,
    #[serde(default)]
    pub kafka_billing_models: Vec<BillingModel>,
}

impl Quota {
    pub fn standard() -> Self {
        Self {
            instance_type_id: STANDARD_BILLING_MODEL.to_string(),
            kafka_billing_models: Vec::new(),
        }
    }

    /// Configured billing models, or a single `standard` billing model when none are listed
    pub fn billing_models(&self) -> Vec<BillingModel> {
        if self.kafka_billing_models.is_empty() {
            vec![BillingModel::standard()]
        } else {
            self.kafka_billing_models.clone()
        }
    }

    pub fn billing_model_by_id(&self, id: &str) -> Option<BillingModel> {
        self.billing_models().into_iter().find(|bm| bm.id.eq_ignore_ascii_case(id))
    }
}

/// Granted quota lookups shared by organisations and service accounts
pub trait QuotaManagementListItem {
    /// Quota configured for this item, or the default standard quota
    fn granted_quota(&self) -> Vec<Quota>;

    /// Item-level instance limit, 0 when unset
    fn item_max_allowed_instances(&self) -> u32;

    fn quota_for(&self, instance_type: &str) -> Option<Quota> {
        self.granted_quota()
            .into_iter()
            .find(|q| q.instance_type_id.eq_ignore_ascii_case(instance_type))
    }

    fn has_quota_configuration_for(&self, instance_type: &str, billing_model_id: &str) -> bool {
        self.quota_for(instance_type)
            .is_some_and(|q| q.billing_model_by_id(billing_model_id).is_some())
    }

    /// The billing-model limit wins over the item limit, which wins over the global default.
    /// Unknown instance types or billing models and expired billing models allow nothing.
    fn max_allowed_instances(&self, instance_type: &str, billing_model_id: &str) -> u32 {
        let Some(billing_model) = self.quota_for(instance_type).and_then(|q| q.billing_model_by_id(billing_model_id)) else {
            return 0;
        };
        if billing_model.is_expired() {
            return 0;
        }
        if billing_model.max_allowed_instances > 0 {
            return billing_model.max_allowed_instances;
        }
        match self.item_max_allowed_instances() {
            0 => super::DEFAULT_MAX_ALLOWED_INSTANCES,
            max => max,
        }
    }

    fn is_instance_count_within_limit(&self, instance_type: &str, billing_model_id: &str, count: u32) -> bool {
        count <= self.max_allowed_instances(instance_type, billing_model_id)
    }
}

pub(super) fn granted_or_default(granted: &[Quota]) -> Vec<Quota> {
    if granted.is_empty() {
        vec![Quota::standard()]
    } else {
        granted.to_vec()
    }
}
