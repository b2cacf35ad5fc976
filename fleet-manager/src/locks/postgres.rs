use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use super::{DistributedLock, LockError, LockFactory, Result};

/// Lock held by an open transaction that has inserted the lock id into `distributed_locks`.
///
/// A second transaction inserting the same id waits on the row lock until the holder rolls back. The row never becomes
/// visible to anyone else, and an aborted connection rolls it back.
pub struct PgDistributedLock {
    pool: PgPool,
    id: String,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgDistributedLock {
    pub fn new(pool: PgPool, id: impl Into<String>) -> Self {
        Self {
            pool,
            id: id.into(),
            tx: None,
        }
    }
}

#[async_trait]
impl DistributedLock for PgDistributedLock {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self), fields(lock_id = %self.id), err)]
    async fn lock(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(LockError::AlreadyLocked(self.id.clone()));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO distributed_locks (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(&self.id)
            .execute(&mut *tx)
            .await?;

        debug!("Acquired distributed lock");
        self.tx = Some(tx);
        Ok(())
    }

    #[instrument(skip(self), fields(lock_id = %self.id), err)]
    async fn unlock(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| LockError::NotLocked(self.id.clone()))?;
        tx.rollback().await?;
        debug!("Released distributed lock");
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.tx.is_some()
    }
}

/// Creates [`PgDistributedLock`]s on a shared pool. Every held lock pins one pooled connection.
#[derive(Clone)]
pub struct PgLockFactory {
    pool: PgPool,
}

impl PgLockFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl LockFactory for PgLockFactory {
    fn new_lock(&self, id: &str) -> Box<dyn DistributedLock> {
        Box::new(PgDistributedLock::new(self.pool.clone(), id))
    }
}
