//! Static allow-list of organisations and service accounts with their granted quota.
//!
//! Loaded once from configuration and read by the quota-management-list quota service. Each entry may grant quota per
//! instance type and billing model, optionally with an expiration date after which the billing model allows nothing.
//!
//! ```yaml
//! quota_management_list:
//!   enable_instance_limit_control: true
//!   registered_users_per_organisation:
//!     - id: "13640203"
//!       any_user: true
//!       max_allowed_instances: 5
//!       granted_quota:
//!         - instance_type_id: standard
//!           kafka_billing_models:
//!             - id: standard
//!               max_allowed_instances: 5
//!               expiration_date: 2030-01-30 +00:00
//!   registered_service_accounts:
//!     - username: testuser1@example.com
//!       max_allowed_instances: 3
//! ```

mod account;
mod expiration_date;
mod organisation;
mod quota;

use serde::{Deserialize, Serialize};

pub use account::{Account, AccountList};
pub use expiration_date::{ExpirationDate, ParseExpirationDateError};
pub use organisation::{Organisation, OrganisationList};
pub use quota::{BillingModel, Quota, QuotaManagementListItem, STANDARD_BILLING_MODEL};

/// Instances allowed to an entry that configures no limit of its own
pub const DEFAULT_MAX_ALLOWED_INSTANCES: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaManagementListConfig {
    /// When disabled, reservations always succeed without counting existing instances
    pub enable_instance_limit_control: bool,
    pub registered_users_per_organisation: OrganisationList,
    pub registered_service_accounts: AccountList,
}

impl QuotaManagementListConfig {
    /// The account registered for `username`, either through organisation `org_id` or as a service account
    pub fn get_allowed_account_by_username_and_org_id(&self, username: &str, org_id: &str) -> Option<Account> {
        if let Some(org) = self.registered_users_per_organisation.get_by_id(org_id)
            && let Some(account) = org.registered_users.get_by_username(username)
        {
            return Some(account.clone());
        }
        self.registered_service_accounts.get_by_username(username).cloned()
    }
}
