use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::clients::ams::{AmsClient, QuotaCost};

type CacheKey = (String, String, String);

/// Memoises quota cost lookups by (organisation, resource, product).
///
/// One cache is created per quota reservation so the billing model resolvers can probe the same product several times
/// with a single round trip. It is never shared between reservations. Concurrent callers are safe, but two callers
/// missing on the same key at once may both hit the entitlement system; the first stored result wins. Failed lookups
/// are not cached.
pub struct QuotaCostCache {
    client: Arc<dyn AmsClient>,
    entries: DashMap<CacheKey, Arc<Vec<QuotaCost>>>,
}

impl QuotaCostCache {
    pub fn new(client: Arc<dyn AmsClient>) -> Self {
        Self {
            client,
            entries: DashMap::new(),
        }
    }

    pub async fn get_quota_costs_for_product(
        &self,
        organisation_id: &str,
        resource_name: &str,
        product: &str,
    ) -> anyhow::Result<Arc<Vec<QuotaCost>>> {
        let key = (organisation_id.to_string(), resource_name.to_string(), product.to_string());
        let cached = self.entries.get(&key).map(|entry| entry.value().clone());
        if let Some(costs) = cached {
            return Ok(costs);
        }

        debug!(organisation_id, resource_name, product, "Fetching quota costs");
        let costs = Arc::new(
            self.client
                .get_quota_costs_for_product(organisation_id, resource_name, product)
                .await?,
        );
        Ok(self.entries.entry(key).or_insert(costs).value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ams::tests::StubAmsClient;

    #[tokio::test]
    async fn second_lookup_for_same_key_is_served_from_cache() {
        let client = Arc::new(StubAmsClient::default().with_quota_costs(
            "rhosak",
            "RHOSAK",
            vec![QuotaCost {
                allowed: 5,
                ..Default::default()
            }],
        ));
        let cache = QuotaCostCache::new(client.clone());

        let first = cache.get_quota_costs_for_product("org", "rhosak", "RHOSAK").await.unwrap();
        let second = cache.get_quota_costs_for_product("org", "rhosak", "RHOSAK").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.quota_cost_call_count(), 1);

        cache.get_quota_costs_for_product("org", "rhosak", "RHOSAKTrial").await.unwrap();
        cache.get_quota_costs_for_product("other-org", "rhosak", "RHOSAK").await.unwrap();
        assert_eq!(client.quota_cost_call_count(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let client = Arc::new(StubAmsClient {
            fail_quota_costs: true,
            ..Default::default()
        });
        let cache = QuotaCostCache::new(client.clone());

        assert!(cache.get_quota_costs_for_product("org", "rhosak", "RHOSAK").await.is_err());
        assert!(cache.get_quota_costs_for_product("org", "rhosak", "RHOSAK").await.is_err());
        assert_eq!(client.quota_cost_call_count(), 2);
        assert!(cache.is_empty());
    }
}
