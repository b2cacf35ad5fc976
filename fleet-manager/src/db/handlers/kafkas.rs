use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, query_builder::QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::kafkas::{KafkaCountFilter, KafkaRequest, KafkaStatus},
};

const KAFKA_COLUMNS: &str = "id, name, owner, organisation_id, cloud_provider, region, cluster_id, instance_type, size_id, quota_type, \
     desired_kafka_billing_model, actual_kafka_billing_model, marketplace, billing_cloud_account_id, subscription_id, \
     bootstrap_server_host, sso_client_id, sso_client_secret, status, failed_reason, expires_at, created_at, updated_at";

/// Filter options for listing kafka requests
#[derive(Debug, Clone, Default)]
pub struct KafkaFilter {
    /// None = any status
    pub statuses: Option<Vec<KafkaStatus>>,
    pub cluster_id: Option<String>,
    pub counts: KafkaCountFilter,
}

impl KafkaFilter {
    pub fn by_status(statuses: &[KafkaStatus]) -> Self {
        Self {
            statuses: Some(statuses.to_vec()),
            ..Default::default()
        }
    }

    fn push_conditions(&self, query: &mut QueryBuilder<'_, Postgres>) {
        if let Some(statuses) = &self.statuses {
            let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            query.push(" AND status = ANY(");
            query.push_bind(statuses);
            query.push(")");
        }
        if let Some(cluster_id) = &self.cluster_id {
            query.push(" AND cluster_id = ");
            query.push_bind(cluster_id.clone());
        }
        if let Some(instance_type) = &self.counts.instance_type {
            query.push(" AND instance_type = ");
            query.push_bind(instance_type.clone());
        }
        if let Some(billing_model) = &self.counts.billing_model {
            query.push(" AND (actual_kafka_billing_model = ");
            query.push_bind(billing_model.clone());
            query.push(" OR desired_kafka_billing_model = ");
            query.push_bind(billing_model.clone());
            query.push(")");
        }
        if let Some(organisation_id) = &self.counts.organisation_id {
            query.push(" AND organisation_id = ");
            query.push_bind(organisation_id.clone());
        }
        if let Some(owner) = &self.counts.owner {
            query.push(" AND owner = ");
            query.push_bind(owner.clone());
        }
    }
}

pub struct Kafkas<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Kafkas<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn count(&mut self, filter: &KafkaFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM kafka_requests WHERE 1=1");
        filter.push_conditions(&mut query);
        let count: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }

    #[instrument(skip(self), err)]
    pub async fn count_by_status(&mut self) -> Result<Vec<(KafkaStatus, i64)>> {
        let rows: Vec<(KafkaStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM kafka_requests GROUP BY status ORDER BY status")
                .fetch_all(&mut *self.db)
                .await?;
        Ok(rows)
    }

    #[instrument(skip(self), err)]
    pub async fn update_status(&mut self, id: Uuid, status: KafkaStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE kafka_requests SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Moves every deprovisionable request owned by one of `owners` to `deprovision`
    #[instrument(skip(self), err)]
    pub async fn deprovision_for_owners(&mut self, owners: &[String]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE kafka_requests
            SET status = 'deprovision', updated_at = now()
            WHERE owner = ANY($1)
              AND status NOT IN ('deprovision', 'deleting', 'deleted')
            "#,
        )
        .bind(owners)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    pub async fn deprovision_expired(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE kafka_requests
            SET status = 'deprovision', updated_at = now()
            WHERE expires_at IS NOT NULL
              AND expires_at <= $1
              AND status NOT IN ('deprovision', 'deleting', 'deleted')
            "#,
        )
        .bind(now)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Kafkas<'c> {
    type CreateRequest = KafkaRequest;
    type UpdateRequest = KafkaRequest;
    type Response = KafkaRequest;
    type Id = Uuid;
    type Filter = KafkaFilter;

    #[instrument(skip(self, request), fields(kafka_id = %request.id), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let kafka = sqlx::query_as::<_, KafkaRequest>(&format!(
            r#"
            INSERT INTO kafka_requests ({KAFKA_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
            RETURNING {KAFKA_COLUMNS}
            "#
        ))
        .bind(request.id)
        .bind(&request.name)
        .bind(&request.owner)
        .bind(&request.organisation_id)
        .bind(&request.cloud_provider)
        .bind(&request.region)
        .bind(&request.cluster_id)
        .bind(&request.instance_type)
        .bind(&request.size_id)
        .bind(request.quota_type)
        .bind(&request.desired_kafka_billing_model)
        .bind(&request.actual_kafka_billing_model)
        .bind(&request.marketplace)
        .bind(&request.billing_cloud_account_id)
        .bind(&request.subscription_id)
        .bind(&request.bootstrap_server_host)
        .bind(&request.sso_client_id)
        .bind(&request.sso_client_secret)
        .bind(request.status)
        .bind(&request.failed_reason)
        .bind(request.expires_at)
        .bind(request.created_at)
        .bind(request.updated_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(kafka)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let kafka = sqlx::query_as::<_, KafkaRequest>(&format!("SELECT {KAFKA_COLUMNS} FROM kafka_requests WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(kafka)
    }

    #[instrument(skip(self), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!("SELECT {KAFKA_COLUMNS} FROM kafka_requests WHERE 1=1"));
        filter.push_conditions(&mut query);
        query.push(" ORDER BY created_at ASC");

        let kafkas = query.build_query_as::<KafkaRequest>().fetch_all(&mut *self.db).await?;
        Ok(kafkas)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kafka_requests WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let kafka = sqlx::query_as::<_, KafkaRequest>(&format!(
            r#"
            UPDATE kafka_requests SET
                cluster_id = $2,
                desired_kafka_billing_model = $3,
                actual_kafka_billing_model = $4,
                marketplace = $5,
                billing_cloud_account_id = $6,
                subscription_id = $7,
                bootstrap_server_host = $8,
                sso_client_id = $9,
                sso_client_secret = $10,
                status = $11,
                failed_reason = $12,
                expires_at = $13,
                quota_type = $14,
                updated_at = now()
            WHERE id = $1
            RETURNING {KAFKA_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.cluster_id)
        .bind(&request.desired_kafka_billing_model)
        .bind(&request.actual_kafka_billing_model)
        .bind(&request.marketplace)
        .bind(&request.billing_cloud_account_id)
        .bind(&request.subscription_id)
        .bind(&request.bootstrap_server_host)
        .bind(&request.sso_client_id)
        .bind(&request.sso_client_secret)
        .bind(request.status)
        .bind(&request.failed_reason)
        .bind(request.expires_at)
        .bind(request.quota_type)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(kafka)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use crate::config::QuotaType;
    use crate::db::models::kafkas::STANDARD_INSTANCE_TYPE;
    use sqlx::PgPool;

    fn kafka(owner: &str, org: &str) -> KafkaRequest {
        let mut kafka = KafkaRequest::new("my-kafka", owner, org, STANDARD_INSTANCE_TYPE, "x1");
        kafka.desired_kafka_billing_model = Some("standard".to_string());
        kafka
    }

    #[sqlx::test]
    #[test_log::test]
    async fn create_update_and_delete(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Kafkas::new(&mut conn);

        let created = repo.create(&kafka("owner", "org")).await.unwrap();
        assert_eq!(created.status, KafkaStatus::Accepted);

        let mut changed = created.clone();
        changed.cluster_id = Some("cluster-1".to_string());
        changed.status = KafkaStatus::Preparing;
        changed.quota_type = QuotaType::Ams;
        let updated = repo.update(created.id, &changed).await.unwrap();
        assert_eq!(updated.cluster_id.as_deref(), Some("cluster-1"));
        assert_eq!(updated.status, KafkaStatus::Preparing);
        assert_eq!(updated.quota_type, QuotaType::Ams);

        assert!(repo.delete(created.id).await.unwrap());
        assert!(repo.get_by_id(created.id).await.unwrap().is_none());
        assert!(matches!(repo.update(created.id, &changed).await, Err(DbError::NotFound)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn list_and_count_with_filters(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Kafkas::new(&mut conn);

        repo.create(&kafka("alice", "org-a")).await.unwrap();
        repo.create(&kafka("bob", "org-a")).await.unwrap();
        let mut ready = kafka("carol", "org-b");
        ready.status = KafkaStatus::Ready;
        repo.create(&ready).await.unwrap();

        let accepted = repo.list(&KafkaFilter::by_status(&[KafkaStatus::Accepted])).await.unwrap();
        assert_eq!(accepted.len(), 2);

        let org_a = KafkaFilter {
            counts: KafkaCountFilter {
                organisation_id: Some("org-a".to_string()),
                billing_model: Some("standard".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(repo.count(&org_a).await.unwrap(), 2);

        let counts = repo.count_by_status().await.unwrap();
        assert!(counts.contains(&(KafkaStatus::Accepted, 2)));
        assert!(counts.contains(&(KafkaStatus::Ready, 1)));

        assert_eq!(repo.deprovision_for_owners(&["carol".to_string()]).await.unwrap(), 1);
        let deprovision = repo.list(&KafkaFilter::by_status(&[KafkaStatus::Deprovision])).await.unwrap();
        assert_eq!(deprovision[0].owner, "carol");
    }
}
