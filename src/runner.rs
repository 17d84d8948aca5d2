use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ReconcileError;
use crate::lockengine::LockEngine;
use crate::model::{now_ms, Ms};
use crate::ports::SnapshotRefresher;
use crate::scheduler::Scheduler;
use crate::store::{InMemoryStore, PropertyCache};

/// One full reconciliation: refresh the lock snapshots, derive the desired
/// codes, then converge the locks.
pub struct Reconciler {
    scheduler: Scheduler,
    lock_engine: LockEngine,
    refresher: Option<Arc<dyn SnapshotRefresher>>,
    property_cache: Option<Arc<PropertyCache>>,
    compaction: Option<(Arc<InMemoryStore>, u64)>,
}

impl Reconciler {
    pub fn new(scheduler: Scheduler, lock_engine: LockEngine) -> Self {
        Self {
            scheduler,
            lock_engine,
            refresher: None,
            property_cache: None,
            compaction: None,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn SnapshotRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Cleared at the start of every pass.
    pub fn with_property_cache(mut self, cache: Arc<PropertyCache>) -> Self {
        self.property_cache = Some(cache);
        self
    }

    /// Compact the store journal once it holds more than `threshold` appends.
    pub fn with_compaction(mut self, store: Arc<InMemoryStore>, threshold: u64) -> Self {
        self.compaction = Some((store, threshold));
        self
    }

    /// Stops at the first error. Devices written before it stay written.
    pub async fn run_pass(&self, now: Ms) -> Result<(), ReconcileError> {
        if let Some(cache) = &self.property_cache {
            cache.clear();
        }
        if let Some(refresher) = &self.refresher {
            let count = refresher
                .refresh(now)
                .await
                .map_err(ReconcileError::collaborator("refreshing devices"))?;
            debug!(count, "device snapshots refreshed");
        }
        self.scheduler.reconcile_at(now).await?;
        self.lock_engine.update_locks_at(now).await
    }

    /// Returns true if the journal was compacted.
    pub async fn maybe_compact(&self) -> bool {
        let Some((store, threshold)) = &self.compaction else { return false };
        let appends = store.appends_since_compact().await;
        if appends <= *threshold {
            return false;
        }
        match store.compact().await {
            Ok(()) => {
                info!(appends, "store journal compacted");
                true
            }
            Err(e) => {
                warn!("store journal compaction failed: {e}");
                false
            }
        }
    }
}

/// Run a pass every `period` until the task is dropped. A failed pass is
/// logged and retried on the next tick.
pub async fn run_reconciler(reconciler: Arc<Reconciler>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = reconciler.run_pass(now_ms()).await {
            error!("reconciliation pass failed: {e}");
        }
        reconciler.maybe_compact().await;
    }
}
