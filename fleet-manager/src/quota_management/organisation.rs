use serde::{Deserialize, Serialize};

use super::{AccountList, Quota, QuotaManagementListItem, quota::granted_or_default};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Organisation {
    pub id: String,
    /// Every user of the organisation is registered
    pub any_user: bool,
    pub max_allowed_instances: u32,
    pub registered_users: AccountList,
    pub granted_quota: Vec<Quota>,
}

impl Organisation {
    pub fn is_user_registered(&self, username: &str) -> bool {
        self.any_user || self.registered_users.get_by_username(username).is_some()
    }

    pub fn has_users_registered(&self) -> bool {
        !self.registered_users.is_empty()
    }
}

impl QuotaManagementListItem for Organisation {
    fn granted_quota(&self) -> Vec<Quota> {
        granted_or_default(&self.granted_quota)
    }

    fn item_max_allowed_instances(&self) -> u32 {
        self.max_allowed_instances
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganisationList(pub Vec<Organisation>);

impl OrganisationList {
    pub fn get_by_id(&self, id: &str) -> Option<&Organisation> {
        self.0.iter().find(|org| org.id == id)
    }
}
