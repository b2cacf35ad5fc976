//! Reconcilers driving kafka requests through their lifecycle.
//!
//! Every worker owns the transition out of one status and only reads requests persisted in that status, so the
//! pipeline `accepted -> preparing -> provisioning -> ready` advances one stage per pass. A pass never stops at the
//! first failing request: errors are collected and returned to the [`ReconcileLoop`], which logs them.

pub mod accepted;
pub mod deleting;
pub mod kafka_manager;
pub mod preparing;
pub mod provisioning;
pub mod ready;

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use accepted::AcceptedKafkaManager;
pub use deleting::DeletingKafkaManager;
pub use kafka_manager::KafkaManager;
pub use preparing::PreparingKafkaManager;
pub use provisioning::ProvisioningKafkaManager;
pub use ready::ReadyKafkaManager;

#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &'static str;

    /// One pass over the requests this worker owns, returning every error encountered
    async fn reconcile(&self) -> Vec<anyhow::Error>;
}

/// Runs all reconcilers on a fixed interval until cancelled
pub struct ReconcileLoop {
    workers: Vec<Arc<dyn Reconciler>>,
    interval: Duration,
}

impl ReconcileLoop {
    pub fn new(workers: Vec<Arc<dyn Reconciler>>, interval: Duration) -> Self {
        Self { workers, interval }
    }

    /// Run every worker once, concurrently. Returns the number of errors reported.
    pub async fn run_once(&self) -> usize {
        let results = join_all(self.workers.iter().map(|worker| async move { (worker.name(), worker.reconcile().await) })).await;

        let mut total = 0;
        for (name, errors) in results {
            for error in &errors {
                warn!(worker = name, "Reconcile error: {:#}", error);
            }
            total += errors.len();
        }
        total
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(workers = self.workers.len(), interval = ?self.interval, "Starting reconcile loop");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("Reconcile loop shutting down");
                    return;
                }
            }

            let errors = self.run_once().await;
            debug!(errors, "Reconcile pass finished");
        }
    }
}
