//! Quota admission for kafka requests.
//!
//! Two backends implement [`QuotaService`]: [`ams::AmsQuotaService`] reserves entitlement through the accounts
//! management service, [`quota_list::QuotaManagementListService`] checks the static allow-list from configuration.
//! Each kafka request records the backend it was admitted with, so [`QuotaServiceFactory`] hands out the matching one.

pub mod ams;
pub mod billing;
pub mod cost_cache;
pub mod quota_list;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::QuotaType;
use crate::db::models::kafkas::KafkaRequest;
use crate::errors::{Result, ServiceError};

#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Whether `kafka`'s owner has any quota configured for `instance_type`
    async fn check_if_quota_is_defined_for_instance_type(&self, kafka: &KafkaRequest, instance_type: &str) -> Result<bool>;

    /// Reserve quota for `kafka`, recording the billing model it was admitted under.
    ///
    /// Returns the subscription id when the backend creates one.
    async fn reserve_quota(&self, kafka: &mut KafkaRequest) -> Result<Option<String>>;

    /// Release a reservation. Absent subscription ids are ignored.
    async fn delete_quota(&self, subscription_id: Option<&str>) -> Result<()>;
}

/// Hands out the quota service for a [`QuotaType`]
#[derive(Clone)]
pub struct QuotaServiceFactory {
    ams: Option<Arc<dyn QuotaService>>,
    quota_list: Arc<dyn QuotaService>,
}

impl QuotaServiceFactory {
    /// `ams` is `None` when no entitlement endpoint is configured
    pub fn new(ams: Option<Arc<dyn QuotaService>>, quota_list: Arc<dyn QuotaService>) -> Self {
        Self { ams, quota_list }
    }

    pub fn get_quota_service(&self, quota_type: QuotaType) -> Result<Arc<dyn QuotaService>> {
        match quota_type {
            QuotaType::QuotaManagementList => Ok(self.quota_list.clone()),
            QuotaType::Ams => self
                .ams
                .clone()
                .ok_or_else(|| ServiceError::general("quota service type 'ams' is not configured")),
        }
    }
}
