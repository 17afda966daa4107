//! Bounded worker pool.
//!
//! Items go through a bounded channel to a dispatcher task that runs at
//! most `degree` handler futures at a time. A worker slot is taken
//! *before* the next item is pulled from the channel, so items start in
//! the order they were accepted; with a degree of 1 they also finish in
//! that order.
//!
//! Lifecycle: `Running` until [`WorkerPool::signal_complete`] closes the
//! input, then `Completed` once the channel is drained and every handler
//! has returned, or `Faulted` if a handler task panicked.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PoolState {
    Running,
    Completed,
    Faulted(String),
}

/// Capacity reserved in the pool's input; sending through it cannot fail.
pub struct Slot<T> {
    permit: mpsc::OwnedPermit<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> Slot<T> {
    pub fn send(self, item: T) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.permit.send(item);
    }
}

pub struct WorkerPool<T> {
    name: String,
    input: Mutex<Option<mpsc::Sender<T>>>,
    depth: Arc<AtomicUsize>,
    state: watch::Receiver<PoolState>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start the pool's dispatcher task. Must be called inside a tokio
    /// runtime.
    ///
    /// `capacity` bounds how many accepted items may wait for a worker;
    /// `None` leaves it effectively unbounded.
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        degree: usize,
        capacity: Option<usize>,
        handler: F,
    ) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let capacity = capacity
            .unwrap_or(Semaphore::MAX_PERMITS)
            .clamp(1, Semaphore::MAX_PERMITS);
        let (tx, rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(PoolState::Running);
        let depth = Arc::new(AtomicUsize::new(0));

        tokio::spawn(dispatch(
            name.clone(),
            rx,
            handler,
            degree.max(1),
            Arc::clone(&depth),
            state_tx,
        ));

        Self {
            name,
            input: Mutex::new(Some(tx)),
            depth,
            state: state_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand an item to the pool, waiting for capacity if the pool is
    /// saturated. Returns `false` once completion has been signalled.
    pub async fn accept(&self, item: T) -> bool {
        let Some(tx) = self.sender() else {
            return false;
        };
        match tx.reserve_owned().await {
            Ok(permit) => {
                Slot {
                    permit,
                    depth: Arc::clone(&self.depth),
                }
                .send(item);
                true
            }
            Err(_) => false,
        }
    }

    /// Reserve capacity, waiting at most `wait`.
    ///
    /// `None` if the pool stayed saturated for the whole wait or no longer
    /// accepts work.
    pub async fn try_slot(&self, wait: Duration) -> Option<Slot<T>> {
        let tx = self.sender()?;
        match tokio::time::timeout(wait, tx.reserve_owned()).await {
            Ok(Ok(permit)) => Some(Slot {
                permit,
                depth: Arc::clone(&self.depth),
            }),
            _ => None,
        }
    }

    /// Items accepted but not yet started.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Stop accepting new items. Already accepted items still run.
    pub fn signal_complete(&self) {
        let tx = self
            .input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if tx.is_some() {
            debug!(pool = %self.name, "worker pool input closed");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Resolves once the pool has completed, or with the fault that ended it.
    pub async fn completion(&self) -> Result<()> {
        let mut state = self.state.clone();
        let outcome = state
            .wait_for(|s| *s != PoolState::Running)
            .await
            .map_err(|_| Error::Pool(format!("{} dispatcher stopped unexpectedly", self.name)))?
            .clone();
        match outcome {
            PoolState::Faulted(reason) => Err(Error::Pool(reason)),
            _ => Ok(()),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<T>> {
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn dispatch<T, F, Fut>(
    name: String,
    mut input: mpsc::Receiver<T>,
    handler: F,
    degree: usize,
    depth: Arc<AtomicUsize>,
    state: watch::Sender<PoolState>,
) where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let workers = Arc::new(Semaphore::new(degree));
    let mut running = JoinSet::new();
    let mut fault = None;

    debug!(pool = %name, degree, "worker pool started");

    loop {
        let Ok(worker) = Arc::clone(&workers).acquire_owned().await else {
            break;
        };
        let Some(item) = input.recv().await else {
            break;
        };
        depth.fetch_sub(1, Ordering::SeqCst);

        let work = handler(item);
        running.spawn(async move {
            work.await;
            drop(worker);
        });

        while let Some(result) = running.try_join_next() {
            note_fault(&name, &mut fault, result);
        }
    }

    while let Some(result) = running.join_next().await {
        note_fault(&name, &mut fault, result);
    }

    debug!(pool = %name, faulted = fault.is_some(), "worker pool drained");
    state.send_replace(match fault {
        Some(reason) => PoolState::Faulted(reason),
        None => PoolState::Completed,
    });
}

fn note_fault(name: &str, fault: &mut Option<String>, result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        error!(pool = %name, error = %e, "worker task failed");
        fault.get_or_insert_with(|| format!("{name} worker task failed: {e}"));
    }
}
