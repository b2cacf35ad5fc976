use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::instrument;

use super::{DistributedLock, LockError, LockFactory, Result};

struct LockHandle {
    lock: tokio::sync::Mutex<Box<dyn DistributedLock>>,
    locked: AtomicBool,
}

/// Locks addressed by id.
///
/// Every [`lock`](Self::lock) call creates a fresh handle and registers it under the id, and
/// [`unlock`](Self::unlock) releases the oldest handle that currently holds the lock. Registration happens under a
/// short synchronous mutex so that it never waits on a lock being acquired.
pub struct DistributedLockMgr {
    factory: Arc<dyn LockFactory>,
    registry: Mutex<HashMap<String, Vec<Arc<LockHandle>>>>,
}

impl DistributedLockMgr {
    pub fn new(factory: Arc<dyn LockFactory>) -> Self {
        Self {
            factory,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until `id` is locked for the caller
    #[instrument(skip(self), err)]
    pub async fn lock(&self, id: &str) -> Result<()> {
        let handle = Arc::new(LockHandle {
            lock: tokio::sync::Mutex::new(self.factory.new_lock(id)),
            locked: AtomicBool::new(false),
        });
        self.registry.lock().entry(id.to_string()).or_default().push(handle.clone());
        let mut registration = Registration {
            mgr: self,
            id,
            handle: handle.clone(),
            acquired: false,
        };

        handle.lock.lock().await.lock().await?;
        handle.locked.store(true, Ordering::SeqCst);
        registration.acquired = true;
        Ok(())
    }

    /// Release the oldest held lock on `id`
    #[instrument(skip(self), err)]
    pub async fn unlock(&self, id: &str) -> Result<()> {
        let handle = {
            let mut registry = self.registry.lock();
            let handles = registry.get_mut(id).ok_or_else(|| LockError::NotLocked(id.to_string()))?;
            let position = handles
                .iter()
                .position(|h| h.locked.load(Ordering::SeqCst))
                .ok_or_else(|| LockError::NotLocked(id.to_string()))?;
            let handle = handles.remove(position);
            if handles.is_empty() {
                registry.remove(id);
            }
            handle
        };

        handle.locked.store(false, Ordering::SeqCst);
        let result = handle.lock.lock().await.unlock().await;
        result
    }

    /// Number of handles registered for `id`, held or waiting
    pub fn registered(&self, id: &str) -> usize {
        self.registry.lock().get(id).map_or(0, Vec::len)
    }

    fn deregister(&self, id: &str, handle: &Arc<LockHandle>) {
        let mut registry = self.registry.lock();
        if let Some(handles) = registry.get_mut(id) {
            handles.retain(|h| !Arc::ptr_eq(h, handle));
            if handles.is_empty() {
                registry.remove(id);
            }
        }
    }
}

/// Deregisters a pending handle when acquisition fails or the `lock` future is dropped
struct Registration<'a> {
    mgr: &'a DistributedLockMgr,
    id: &'a str,
    handle: Arc<LockHandle>,
    acquired: bool,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.acquired {
            self.mgr.deregister(self.id, &self.handle);
        }
    }
}
