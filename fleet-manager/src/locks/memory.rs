use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{DistributedLock, LockError, LockFactory, Result};

/// Process-local locks, for single-replica deployments and tests
#[derive(Clone, Default)]
pub struct MemoryLockFactory {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryLockFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockFactory for MemoryLockFactory {
    fn new_lock(&self, id: &str) -> Box<dyn DistributedLock> {
        let mutex = self.locks.entry(id.to_string()).or_default().clone();
        Box::new(MemoryLock {
            id: id.to_string(),
            mutex,
            guard: None,
        })
    }
}

struct MemoryLock {
    id: String,
    mutex: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
impl DistributedLock for MemoryLock {
    fn id(&self) -> &str {
        &self.id
    }

    async fn lock(&mut self) -> Result<()> {
        if self.guard.is_some() {
            return Err(LockError::AlreadyLocked(self.id.clone()));
        }
        self.guard = Some(self.mutex.clone().lock_owned().await);
        Ok(())
    }

    async fn unlock(&mut self) -> Result<()> {
        self.guard.take().map(drop).ok_or_else(|| LockError::NotLocked(self.id.clone()))
    }

    fn is_locked(&self) -> bool {
        self.guard.is_some()
    }
}
