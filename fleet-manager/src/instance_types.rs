//! Catalogue of the kafka instance types the service offers, with their sizes and billing models.

use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

pub const MARKETPLACE_BILLING_MODEL: &str = "marketplace";
pub const STANDARD_AMS_BILLING_MODEL: &str = "standard";
pub const MARKETPLACE_AMS_BILLING_MODEL: &str = "marketplace";

/// A purchasing plan for an instance type and the entitlement labels it accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KafkaBillingModel {
    pub id: String,
    pub ams_resource: String,
    pub ams_product: String,
    pub ams_billing_models: Vec<String>,
    #[serde(default)]
    pub grace_period_days: u32,
}

impl KafkaBillingModel {
    pub fn has_support_for_standard(&self) -> bool {
        self.ams_billing_models.iter().any(|bm| bm == STANDARD_AMS_BILLING_MODEL)
    }

    pub fn has_support_for_marketplace(&self) -> bool {
        self.ams_billing_models
            .iter()
            .any(|bm| bm.to_ascii_lowercase().starts_with(MARKETPLACE_AMS_BILLING_MODEL))
    }

    pub fn has_support_for_ams_billing_model(&self, label: &str) -> bool {
        self.ams_billing_models.iter().any(|bm| bm.eq_ignore_ascii_case(label))
    }

    /// Copy of this billing model accepting only `label`
    pub fn restricted_to(&self, label: &str) -> Self {
        Self {
            ams_billing_models: vec![label.to_string()],
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KafkaInstanceSize {
    pub id: String,
    /// Streaming units this size takes from the allow-list instance limits
    pub capacity_consumed: u32,
    /// Units of entitlement quota this size consumes
    pub quota_consumed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub lifespan: Option<std::time::Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KafkaInstanceType {
    pub id: String,
    pub display_name: String,
    pub sizes: Vec<KafkaInstanceSize>,
    pub supported_billing_models: Vec<KafkaBillingModel>,
}

impl KafkaInstanceType {
    pub fn get_kafka_instance_size_by_id(&self, size_id: &str) -> Result<&KafkaInstanceSize, ServiceError> {
        self.sizes.iter().find(|size| size.id == size_id).ok_or_else(|| {
            ServiceError::validation(format!(
                "Kafka instance size id: '{size_id}' not found for '{}' instance type",
                self.id
            ))
        })
    }

    pub fn get_kafka_billing_model_by_id(&self, billing_model_id: &str) -> Result<&KafkaBillingModel, ServiceError> {
        self.supported_billing_models
            .iter()
            .find(|bm| bm.id.eq_ignore_ascii_case(billing_model_id))
            .ok_or_else(|| {
                ServiceError::validation(format!(
                    "Unable to find billing model '{billing_model_id}' for instance type '{}'",
                    self.id
                ))
            })
    }
}

/// Instance types supported by this deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupportedKafkaInstanceTypes(pub Vec<KafkaInstanceType>);

impl SupportedKafkaInstanceTypes {
    pub fn get_kafka_instance_type_by_id(&self, instance_type: &str) -> Result<&KafkaInstanceType, ServiceError> {
        self.0
            .iter()
            .find(|t| t.id == instance_type)
            .ok_or_else(|| ServiceError::validation(format!("Unable to find kafka instance type for '{instance_type}'")))
    }

    pub fn get_kafka_instance_size(&self, instance_type: &str, size_id: &str) -> Result<&KafkaInstanceSize, ServiceError> {
        self.get_kafka_instance_type_by_id(instance_type)?
            .get_kafka_instance_size_by_id(size_id)
    }

    pub fn get_billing_model_by_id(&self, instance_type: &str, billing_model_id: &str) -> Result<&KafkaBillingModel, ServiceError> {
        self.get_kafka_instance_type_by_id(instance_type)?
            .get_kafka_billing_model_by_id(billing_model_id)
    }
}

impl Default for SupportedKafkaInstanceTypes {
    fn default() -> Self {
        let rhosak = |product: &str, id: &str, labels: &[&str]| KafkaBillingModel {
            id: id.to_string(),
            ams_resource: "rhosak".to_string(),
            ams_product: product.to_string(),
            ams_billing_models: labels.iter().map(|l| l.to_string()).collect(),
            grace_period_days: 0,
        };
        Self(vec![
            KafkaInstanceType {
                id: "standard".to_string(),
                display_name: "Standard".to_string(),
                sizes: vec![
                    KafkaInstanceSize {
                        id: "x1".to_string(),
                        capacity_consumed: 1,
                        quota_consumed: 1,
                        lifespan: None,
                    },
                    KafkaInstanceSize {
                        id: "x2".to_string(),
                        capacity_consumed: 2,
                        quota_consumed: 2,
                        lifespan: None,
                    },
                ],
                supported_billing_models: vec![
                    rhosak("RHOSAK", "standard", &["standard"]),
                    rhosak(
                        "RHOSAK",
                        MARKETPLACE_BILLING_MODEL,
                        &["marketplace", "marketplace-rhm", "marketplace-aws", "marketplace-azure"],
                    ),
                ],
            },
            KafkaInstanceType {
                id: "eval".to_string(),
                display_name: "Trial".to_string(),
                sizes: vec![KafkaInstanceSize {
                    id: "x1".to_string(),
                    capacity_consumed: 1,
                    quota_consumed: 1,
                    lifespan: Some(std::time::Duration::from_secs(48 * 3600)),
                }],
                supported_billing_models: vec![rhosak("RHOSAKTrial", "standard", &["standard"])],
            },
        ])
    }
}
