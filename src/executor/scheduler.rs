//! Scheduling loop for the ordered path.
//!
//! Each pass walks the waiting list from its head. An entry is dispatched
//! only if its key is not in processing and was not blocked earlier in the
//! same pass; otherwise the key is blocked so no later entry for it can
//! overtake. A pool that refuses an item blocks that key too, and the
//! entry is picked up again on the next pass.

use super::{ErrorSink, Signals};
use crate::error::{Error, Result};
use crate::model::Keyed;
use crate::pool::WorkerPool;
use crate::telemetry::metrics::ExecutorMetrics;
use crate::tracker::{Entry, PendingState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

enum Visit {
    /// Key already blocked this pass.
    Skipped,
    /// Key in processing; now blocked for the rest of the pass.
    Blocked,
    Dispatched,
    /// Pool refused the item; key blocked, entry stays queued.
    Rejected,
}

pub(super) struct Scheduler<T: Keyed> {
    pub(super) executor: String,
    pub(super) state: Arc<PendingState<T>>,
    pub(super) pool: Arc<WorkerPool<T>>,
    pub(super) errors: ErrorSink,
    pub(super) signals: Arc<Signals>,
    pub(super) metrics: ExecutorMetrics,
    pub(super) scan_interval: Duration,
    pub(super) dispatch_wait: Duration,
}

impl<T: Keyed> Scheduler<T> {
    /// Run passes until the executor is shut down.
    pub(super) async fn run(self) {
        debug!(executor = %self.executor, "scheduling loop started");

        while !self.signals.is_cancelled() {
            match self.pass().await {
                Ok(0) => self.idle().await,
                Ok(dispatched) => {
                    trace!(executor = %self.executor, dispatched, "pass finished");
                }
                Err(e) => {
                    self.errors
                        .deliver(Error::Scheduling {
                            key: None,
                            source: Box::new(e),
                        })
                        .await;
                    self.idle().await;
                }
            }
        }

        debug!(executor = %self.executor, "scheduling loop stopped");
    }

    /// Wait until something may have changed, at most one scan interval.
    async fn idle(&self) {
        tokio::select! {
            _ = self.signals.woken() => {}
            _ = tokio::time::sleep(self.scan_interval) => {}
        }
    }

    /// One scan of the waiting list. Returns how many items were dispatched.
    async fn pass(&self) -> Result<usize> {
        if self.state.queued_unique_count()? == 0 {
            return Ok(0);
        }
        self.state.clear_blocked()?;

        let mut dispatched = 0;
        let mut cursor = self.state.dequeue()?;
        while let Some(entry) = cursor.take() {
            match self.visit(&entry).await {
                Ok(Visit::Rejected) => {
                    // Revisit the same entry; its key is now blocked.
                    cursor = Some(entry);
                    continue;
                }
                Ok(Visit::Dispatched) => dispatched += 1,
                Ok(Visit::Skipped | Visit::Blocked) => {}
                Err(e) => {
                    self.errors
                        .deliver(Error::Scheduling {
                            key: Some(entry.key.to_string()),
                            source: Box::new(e),
                        })
                        .await;
                }
            }
            cursor = self.state.next_after(entry.handle)?;
        }
        Ok(dispatched)
    }

    async fn visit(&self, entry: &Entry<T::Key>) -> Result<Visit> {
        if self.state.in_blocked(&entry.key)? {
            return Ok(Visit::Skipped);
        }
        if self.state.in_processing(&entry.key)? {
            self.state.add_to_blocked(&entry.key)?;
            return Ok(Visit::Blocked);
        }

        self.state.add_to_processing(&entry.key)?;
        let Some(slot) = self.pool.try_slot(self.dispatch_wait).await else {
            self.state.remove_from_processing(&entry.key)?;
            self.state.add_to_blocked(&entry.key)?;
            self.metrics.rejected();
            trace!(executor = %self.executor, key = %entry.key, "dispatch rejected");
            return Ok(Visit::Rejected);
        };

        match self.state.remove_from_queue(entry.handle) {
            Ok(item) => {
                slot.send(item);
                self.metrics.dispatched();
                Ok(Visit::Dispatched)
            }
            Err(e) => {
                drop(slot);
                self.state.remove_from_processing(&entry.key)?;
                Err(e)
            }
        }
    }
}
