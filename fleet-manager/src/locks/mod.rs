//! Cross-replica mutual exclusion.
//!
//! A [`DistributedLock`] is a single-use handle on a lock id. [`DistributedLockMgr`] lets callers lock and unlock by id
//! without keeping the handle around. The lock held by a replica is released when its database connection dies, so a
//! crashed replica never leaves an orphaned lock behind.

mod manager;
mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

pub use manager::DistributedLockMgr;
pub use memory::MemoryLockFactory;
pub use postgres::{PgDistributedLock, PgLockFactory};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock '{0}' is not held")]
    NotLocked(String),

    #[error("lock '{0}' is already held by this handle")]
    AlreadyLocked(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, LockError>;

#[async_trait]
pub trait DistributedLock: Send {
    fn id(&self) -> &str;

    /// Wait until the lock is acquired
    async fn lock(&mut self) -> Result<()>;

    /// Release the lock. Fails when this handle does not hold it.
    async fn unlock(&mut self) -> Result<()>;

    fn is_locked(&self) -> bool;
}

/// Creates lock handles for a backend
pub trait LockFactory: Send + Sync {
    fn new_lock(&self, id: &str) -> Box<dyn DistributedLock>;
}
