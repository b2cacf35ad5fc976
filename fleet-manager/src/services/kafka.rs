//! Access to kafka requests for the reconcilers and the quota services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::DbError,
    handlers::{KafkaFilter, Kafkas, Repository},
    models::kafkas::{KafkaCountFilter, KafkaRequest, KafkaStatus},
};
use crate::errors::{Result, ServiceError};

#[async_trait]
pub trait KafkaService: Send + Sync {
    async fn create(&self, kafka: &KafkaRequest) -> Result<KafkaRequest>;

    async fn get(&self, id: Uuid) -> Result<KafkaRequest>;

    async fn list_by_status(&self, statuses: &[KafkaStatus]) -> Result<Vec<KafkaRequest>>;

    /// Requests matching an owner / organisation / instance type / billing model filter, in any status
    async fn list_by(&self, filter: &KafkaCountFilter) -> Result<Vec<KafkaRequest>>;

    /// Persist every mutable field of `kafka`
    async fn update(&self, kafka: &KafkaRequest) -> Result<()>;

    async fn update_status(&self, id: Uuid, status: KafkaStatus) -> Result<()>;

    /// Remove the request for good
    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn count_by_cluster(&self, cluster_id: &str) -> Result<i64>;

    async fn count_by_status(&self) -> Result<Vec<(KafkaStatus, i64)>>;

    /// Move every request owned by one of `owners` to `deprovision`, returning how many moved
    async fn deprovision_for_owners(&self, owners: &[String]) -> Result<u64>;

    async fn deprovision_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// [`KafkaService`] backed by the `kafka_requests` table
#[derive(Clone)]
pub struct PgKafkaService {
    db: PgPool,
}

impl PgKafkaService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        Ok(self.db.acquire().await.map_err(DbError::from)?)
    }
}

#[async_trait]
impl KafkaService for PgKafkaService {
    async fn create(&self, kafka: &KafkaRequest) -> Result<KafkaRequest> {
        let mut conn = self.conn().await?;
        Ok(Kafkas::new(&mut conn).create(kafka).await?)
    }

    async fn get(&self, id: Uuid) -> Result<KafkaRequest> {
        let mut conn = self.conn().await?;
        Kafkas::new(&mut conn)
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Kafka request with id '{id}' not found")))
    }

    async fn list_by_status(&self, statuses: &[KafkaStatus]) -> Result<Vec<KafkaRequest>> {
        let mut conn = self.conn().await?;
        Ok(Kafkas::new(&mut conn).list(&KafkaFilter::by_status(statuses)).await?)
    }

    async fn list_by(&self, filter: &KafkaCountFilter) -> Result<Vec<KafkaRequest>> {
        let mut conn = self.conn().await?;
        let filter = KafkaFilter {
            counts: filter.clone(),
            ..Default::default()
        };
        Ok(Kafkas::new(&mut conn).list(&filter).await?)
    }

    #[instrument(skip(self, kafka), fields(kafka_id = %kafka.id, status = %kafka.status), err)]
    async fn update(&self, kafka: &KafkaRequest) -> Result<()> {
        let mut conn = self.conn().await?;
        Kafkas::new(&mut conn).update(kafka.id, kafka).await?;
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: KafkaStatus) -> Result<()> {
        let mut conn = self.conn().await?;
        if !Kafkas::new(&mut conn).update_status(id, status).await? {
            return Err(ServiceError::not_found(format!("Kafka request with id '{id}' not found")));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn().await?;
        Kafkas::new(&mut conn).delete(id).await?;
        Ok(())
    }

    async fn count_by_cluster(&self, cluster_id: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        let filter = KafkaFilter {
            cluster_id: Some(cluster_id.to_string()),
            ..Default::default()
        };
        Ok(Kafkas::new(&mut conn).count(&filter).await?)
    }

    async fn count_by_status(&self) -> Result<Vec<(KafkaStatus, i64)>> {
        let mut conn = self.conn().await?;
        Ok(Kafkas::new(&mut conn).count_by_status().await?)
    }

    async fn deprovision_for_owners(&self, owners: &[String]) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(Kafkas::new(&mut conn).deprovision_for_owners(owners).await?)
    }

    async fn deprovision_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(Kafkas::new(&mut conn).deprovision_expired(now).await?)
    }
}

/// [`KafkaService`] keeping requests in process memory, for tests and local experiments
#[derive(Default)]
pub struct InMemoryKafkaService {
    kafkas: RwLock<HashMap<Uuid, KafkaRequest>>,
}

impl InMemoryKafkaService {
    pub fn new(kafkas: impl IntoIterator<Item = KafkaRequest>) -> Self {
        Self {
            kafkas: RwLock::new(kafkas.into_iter().map(|k| (k.id, k)).collect()),
        }
    }

    pub fn snapshot(&self, id: Uuid) -> Option<KafkaRequest> {
        self.kafkas.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.kafkas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kafkas.read().is_empty()
    }

    fn not_found(id: Uuid) -> ServiceError {
        ServiceError::not_found(format!("Kafka request with id '{id}' not found"))
    }

    fn deprovision_where(&self, predicate: impl Fn(&KafkaRequest) -> bool) -> u64 {
        let mut moved = 0;
        for kafka in self.kafkas.write().values_mut() {
            if kafka.status.is_deprovisionable() && predicate(kafka) {
                kafka.status = KafkaStatus::Deprovision;
                kafka.updated_at = Utc::now();
                moved += 1;
            }
        }
        moved
    }
}

#[async_trait]
impl KafkaService for InMemoryKafkaService {
    async fn create(&self, kafka: &KafkaRequest) -> Result<KafkaRequest> {
        let mut kafkas = self.kafkas.write();
        if kafkas.contains_key(&kafka.id) {
            return Err(ServiceError::bad_request(format!("Kafka request with id '{}' already exists", kafka.id)));
        }
        kafkas.insert(kafka.id, kafka.clone());
        Ok(kafka.clone())
    }

    async fn get(&self, id: Uuid) -> Result<KafkaRequest> {
        self.snapshot(id).ok_or_else(|| Self::not_found(id))
    }

    async fn list_by_status(&self, statuses: &[KafkaStatus]) -> Result<Vec<KafkaRequest>> {
        let mut kafkas: Vec<KafkaRequest> = self
            .kafkas
            .read()
            .values()
            .filter(|k| statuses.contains(&k.status))
            .cloned()
            .collect();
        kafkas.sort_by_key(|k| k.created_at);
        Ok(kafkas)
    }

    async fn list_by(&self, filter: &KafkaCountFilter) -> Result<Vec<KafkaRequest>> {
        Ok(self.kafkas.read().values().filter(|k| filter.matches(k)).cloned().collect())
    }

    async fn update(&self, kafka: &KafkaRequest) -> Result<()> {
        let mut kafkas = self.kafkas.write();
        let existing = kafkas.get_mut(&kafka.id).ok_or_else(|| Self::not_found(kafka.id))?;
        *existing = KafkaRequest {
            updated_at: Utc::now(),
            ..kafka.clone()
        };
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: KafkaStatus) -> Result<()> {
        let mut kafkas = self.kafkas.write();
        let existing = kafkas.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        existing.status = status;
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.kafkas.write().remove(&id);
        Ok(())
    }

    async fn count_by_cluster(&self, cluster_id: &str) -> Result<i64> {
        let count = self
            .kafkas
            .read()
            .values()
            .filter(|k| k.cluster_id.as_deref() == Some(cluster_id))
            .count();
        Ok(count as i64)
    }

    async fn count_by_status(&self) -> Result<Vec<(KafkaStatus, i64)>> {
        let kafkas = self.kafkas.read();
        Ok(KafkaStatus::ALL
            .iter()
            .filter_map(|status| {
                let count = kafkas.values().filter(|k| k.status == *status).count() as i64;
                (count > 0).then_some((*status, count))
            })
            .collect())
    }

    async fn deprovision_for_owners(&self, owners: &[String]) -> Result<u64> {
        Ok(self.deprovision_where(|k| owners.contains(&k.owner)))
    }

    async fn deprovision_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.deprovision_where(|k| k.is_expired(now)))
    }
}
