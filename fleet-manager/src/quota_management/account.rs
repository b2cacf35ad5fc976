use serde::{Deserialize, Serialize};

use super::{Quota, QuotaManagementListItem, quota::granted_or_default};

/// A service account or user registered directly in the quota list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Account {
    pub username: String,
    pub max_allowed_instances: u32,
    pub granted_quota: Vec<Quota>,
}

impl Account {
    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }
}

impl QuotaManagementListItem for Account {
    fn granted_quota(&self) -> Vec<Quota> {
        granted_or_default(&self.granted_quota)
    }

    fn item_max_allowed_instances(&self) -> u32 {
        self.max_allowed_instances
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountList(pub Vec<Account>);

impl AccountList {
    pub fn get_by_username(&self, username: &str) -> Option<&Account> {
        self.0.iter().find(|account| account.username == username)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota_management::{BillingModel, ExpirationDate};
    use chrono::{Duration, Utc};

    #[test]
    fn expired_billing_model_allows_nothing() {
        let expired = ExpirationDate::from((Utc::now() - Duration::days(1)).fixed_offset());
        let account = Account {
            username: "testuser".to_string(),
            max_allowed_instances: 3,
            granted_quota: vec![Quota {
                instance_type_id: "standard".to_string(),
                kafka_billing_models: vec![BillingModel {
                    expiration_date: Some(expired),
                    max_allowed_instances: 5,
                    ..BillingModel::standard()
                }],
            }],
        };
        assert_eq!(account.max_allowed_instances("standard", "standard"), 0);
        assert!(!account.is_instance_count_within_limit("standard", "standard", 1));
    }

    #[test]
    fn account_limit_applies_when_billing_model_has_none() {
        let account = Account {
            max_allowed_instances: 3,
            ..Account::with_username("testuser")
        };
        assert_eq!(account.max_allowed_instances("standard", "standard"), 3);
    }

    #[test]
    fn lookup_by_username() {
        let list = AccountList(vec![Account::with_username("a"), Account::with_username("b")]);
        assert_eq!(list.get_by_username("b").map(|a| a.username.as_str()), Some("b"));
        assert!(list.get_by_username("c").is_none());
    }
}
