use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::QuotaType;

/// Lifecycle status of a kafka request.
///
/// Forward progress is `accepted -> preparing -> provisioning -> ready`. `deprovision` and `deleting` can be reached from
/// any state, `failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum KafkaStatus {
    Accepted,
    Preparing,
    Provisioning,
    Ready,
    Failed,
    Deprovision,
    Deleting,
    Deleted,
}

impl KafkaStatus {
    pub const ALL: [KafkaStatus; 8] = [
        KafkaStatus::Accepted,
        KafkaStatus::Preparing,
        KafkaStatus::Provisioning,
        KafkaStatus::Ready,
        KafkaStatus::Failed,
        KafkaStatus::Deprovision,
        KafkaStatus::Deleting,
        KafkaStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KafkaStatus::Accepted => "accepted",
            KafkaStatus::Preparing => "preparing",
            KafkaStatus::Provisioning => "provisioning",
            KafkaStatus::Ready => "ready",
            KafkaStatus::Failed => "failed",
            KafkaStatus::Deprovision => "deprovision",
            KafkaStatus::Deleting => "deleting",
            KafkaStatus::Deleted => "deleted",
        }
    }

    /// Statuses from which a request may still be moved to `deprovision` by housekeeping
    pub fn is_deprovisionable(&self) -> bool {
        !matches!(self, KafkaStatus::Deprovision | KafkaStatus::Deleting | KafkaStatus::Deleted)
    }
}

impl fmt::Display for KafkaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kafka instance types offered by the service
pub const STANDARD_INSTANCE_TYPE: &str = "standard";
pub const EVAL_INSTANCE_TYPE: &str = "eval";

/// A kafka request as persisted in `kafka_requests`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct KafkaRequest {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub organisation_id: String,
    pub cloud_provider: String,
    pub region: String,
    pub cluster_id: Option<String>,
    pub instance_type: String,
    pub size_id: String,
    pub quota_type: QuotaType,
    pub desired_kafka_billing_model: Option<String>,
    pub actual_kafka_billing_model: Option<String>,
    pub marketplace: Option<String>,
    pub billing_cloud_account_id: Option<String>,
    pub subscription_id: Option<String>,
    pub bootstrap_server_host: Option<String>,
    pub sso_client_id: Option<String>,
    pub sso_client_secret: Option<String>,
    pub status: KafkaStatus,
    pub failed_reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KafkaRequest {
    /// Create a freshly admitted request in the `accepted` state
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        organisation_id: impl Into<String>,
        instance_type: impl Into<String>,
        size_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner: owner.into(),
            organisation_id: organisation_id.into(),
            cloud_provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            cluster_id: None,
            instance_type: instance_type.into(),
            size_id: size_id.into(),
            quota_type: QuotaType::default(),
            desired_kafka_billing_model: None,
            actual_kafka_billing_model: None,
            marketplace: None,
            billing_cloud_account_id: None,
            subscription_id: None,
            bootstrap_server_host: None,
            sso_client_id: None,
            sso_client_secret: None,
            status: KafkaStatus::Accepted,
            failed_reason: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_subscription(&self) -> bool {
        self.subscription_id.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn has_sso_credentials(&self) -> bool {
        self.sso_client_id.as_deref().is_some_and(|s| !s.is_empty())
            && self.sso_client_secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn has_bootstrap_server_host(&self) -> bool {
        self.bootstrap_server_host.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Empty strings are treated the same as an absent value
    pub fn marketplace(&self) -> Option<&str> {
        self.marketplace.as_deref().filter(|s| !s.is_empty())
    }

    pub fn billing_cloud_account_id(&self) -> Option<&str> {
        self.billing_cloud_account_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn desired_kafka_billing_model(&self) -> Option<&str> {
        self.desired_kafka_billing_model.as_deref().filter(|s| !s.is_empty())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Move to a terminal failed state
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = KafkaStatus::Failed;
        self.failed_reason = Some(reason.into());
    }
}

/// Filter used when counting existing requests for quota checks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KafkaCountFilter {
    pub instance_type: Option<String>,
    pub billing_model: Option<String>,
    pub organisation_id: Option<String>,
    pub owner: Option<String>,
}

impl KafkaCountFilter {
    pub fn matches(&self, kafka: &KafkaRequest) -> bool {
        let billing_model_matches = self.billing_model.as_deref().is_none_or(|bm| {
            kafka.desired_kafka_billing_model.as_deref() == Some(bm) || kafka.actual_kafka_billing_model.as_deref() == Some(bm)
        });
        self.instance_type.as_deref().is_none_or(|t| kafka.instance_type == t)
            && billing_model_matches
            && self.organisation_id.as_deref().is_none_or(|o| kafka.organisation_id == o)
            && self.owner.as_deref().is_none_or(|o| kafka.owner == o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_strings_are_absent() {
        let mut kafka = KafkaRequest::new("k", "owner", "org", STANDARD_INSTANCE_TYPE, "x1");
        kafka.marketplace = Some(String::new());
        kafka.billing_cloud_account_id = Some("".to_string());
        kafka.sso_client_id = Some("id".to_string());
        kafka.sso_client_secret = Some("".to_string());

        assert_eq!(kafka.marketplace(), None);
        assert_eq!(kafka.billing_cloud_account_id(), None);
        assert!(!kafka.has_sso_credentials());
        assert!(!kafka.has_subscription());
    }

    #[test]
    fn count_filter_matches_desired_or_actual_billing_model() {
        let mut kafka = KafkaRequest::new("k", "owner", "org", STANDARD_INSTANCE_TYPE, "x1");
        kafka.actual_kafka_billing_model = Some("standard".to_string());

        let filter = KafkaCountFilter {
            instance_type: Some(STANDARD_INSTANCE_TYPE.to_string()),
            billing_model: Some("standard".to_string()),
            organisation_id: Some("org".to_string()),
            owner: None,
        };
        assert!(filter.matches(&kafka));

        let other_org = KafkaCountFilter {
            organisation_id: Some("other".to_string()),
            ..filter
        };
        assert!(!other_org.matches(&kafka));
    }
}
