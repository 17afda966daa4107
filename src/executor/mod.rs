//! Ordered executor: per-key FIFO with cross-key parallelism.
//!
//! With a degree of parallelism of 1 every item goes straight to the
//! worker pool, which runs them one at a time in submission order. With a
//! higher degree items are parked in [`PendingState`] and a background
//! scheduling loop hands them to the pool whenever their key is free.

mod scheduler;

use crate::config::ExecutorOptions;
use crate::error::{BoxError, Error, Result};
use crate::model::Keyed;
use crate::pool::WorkerPool;
use crate::telemetry::item::{record_outcome, start_item_span};
use crate::telemetry::metrics::ExecutorMetrics;
use crate::tracker::PendingState;
use scheduler::Scheduler;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{Instrument, debug, info};

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Sink for failures caught inside the executor.
pub type ErrorHandler = Arc<dyn Fn(Error) -> HandlerFuture + Send + Sync>;

/// Shared slot for the optional error handler.
///
/// Without a handler, errors are dropped.
#[derive(Clone, Default)]
pub(crate) struct ErrorSink {
    handler: Arc<RwLock<Option<ErrorHandler>>>,
}

impl ErrorSink {
    fn set(&self, handler: Option<ErrorHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub(crate) async fn deliver(&self, error: Error) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(error).await;
        }
    }
}

/// Wake-ups and teardown for the scheduling loop.
#[derive(Default)]
pub(crate) struct Signals {
    wake: Notify,
    cancelled: AtomicBool,
}

impl Signals {
    /// Something changed: an item arrived or a key was released.
    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.wake.notified().await;
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs one item's action and releases its key afterwards.
struct ItemRunner<T: Keyed, F> {
    executor: String,
    action: F,
    state: Option<Arc<PendingState<T>>>,
    errors: ErrorSink,
    signals: Arc<Signals>,
    metrics: ExecutorMetrics,
}

impl<T, F, Fut, E> ItemRunner<T, F>
where
    T: Keyed,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    async fn run(self: Arc<Self>, item: T) {
        let key = item.key().clone();
        let span = start_item_span(&self.executor, &key.to_string());
        let started = Instant::now();

        // The action runs in its own task so a panic surfaces as a JoinError
        // instead of taking the worker down with it.
        let action = {
            let runner = Arc::clone(&self);
            async move {
                let result: std::result::Result<(), BoxError> =
                    (runner.action)(item).await.map_err(Into::into);
                result
            }
        };
        let outcome = match tokio::spawn(action.instrument(span.clone())).await {
            Ok(result) => result,
            Err(join) => Err(Box::new(join) as BoxError),
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        // Release the key whatever the outcome, so later items for it run.
        if let Some(state) = &self.state {
            match state.remove_from_processing(&key) {
                Ok(_) => self.signals.wake(),
                Err(e) => {
                    self.errors
                        .deliver(Error::Processing {
                            key: key.to_string(),
                            source: Box::new(e),
                        })
                        .await;
                }
            }
        }

        self.metrics.processed(outcome.is_ok(), duration_ms);
        record_outcome(
            &span,
            if outcome.is_ok() { "ok" } else { "error" },
            duration_ms,
        );

        if let Err(source) = outcome {
            self.errors
                .deliver(Error::Processing {
                    key: key.to_string(),
                    source,
                })
                .await;
        }
    }
}

/// Executes an async action per item, keeping items that share a key in
/// submission order and one at a time.
///
/// Dropping the executor stops the scheduling loop; already dispatched
/// items keep running.
pub struct OrderedExecutor<T: Keyed> {
    options: ExecutorOptions,
    pool: Arc<WorkerPool<T>>,
    /// `None` on the degree-1 fast path.
    state: Option<Arc<PendingState<T>>>,
    completed: AtomicBool,
    errors: ErrorSink,
    signals: Arc<Signals>,
    metrics: ExecutorMetrics,
}

impl<T: Keyed> OrderedExecutor<T> {
    /// Build an executor and start its worker pool and scheduling loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new<F, Fut, E>(action: F, options: ExecutorOptions) -> Result<Self>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        options.validate()?;

        let errors = ErrorSink::default();
        let signals = Arc::new(Signals::default());
        let metrics = ExecutorMetrics::new(&options.name);
        let degree = options.max_degree_of_parallelism;
        let state = (degree > 1).then(|| Arc::new(PendingState::new()));

        let runner = Arc::new(ItemRunner {
            executor: options.name.clone(),
            action,
            state: state.clone(),
            errors: errors.clone(),
            signals: Arc::clone(&signals),
            metrics: metrics.clone(),
        });
        let pool = Arc::new(WorkerPool::spawn(
            options.name.clone(),
            degree,
            options.bounded_capacity,
            move |item| Arc::clone(&runner).run(item),
        ));

        if let Some(state) = &state {
            let scheduler = Scheduler {
                executor: options.name.clone(),
                state: Arc::clone(state),
                pool: Arc::clone(&pool),
                errors: errors.clone(),
                signals: Arc::clone(&signals),
                metrics: metrics.clone(),
                scan_interval: options.scan_interval,
                dispatch_wait: options.dispatch_wait,
            };
            tokio::spawn(scheduler.run());
        }

        debug!(
            executor = %options.name,
            degree,
            ordered = state.is_some(),
            "executor started"
        );

        Ok(Self {
            options,
            pool,
            state,
            completed: AtomicBool::new(false),
            errors,
            signals,
            metrics,
        })
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Register the sink for internally caught failures, replacing any
    /// previous one.
    pub fn set_error_handler<H, Fut>(&self, handler: H)
    where
        H: Fn(Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ErrorHandler =
            Arc::new(move |error| -> HandlerFuture { Box::pin(handler(error)) });
        self.errors.set(Some(handler));
    }

    pub fn clear_error_handler(&self) {
        self.errors.set(None);
    }

    /// Offer an item.
    ///
    /// Returns `false` without enqueuing once [`complete`](Self::complete)
    /// has been called. Internal failures go to the error handler and
    /// also return `false`.
    pub async fn submit(&self, item: T) -> bool {
        let Some(state) = &self.state else {
            if self.completed.load(Ordering::SeqCst) {
                self.metrics.submitted("refused");
                return false;
            }
            let accepted = self.pool.accept(item).await;
            self.metrics
                .submitted(if accepted { "accepted" } else { "refused" });
            return accepted;
        };

        let key = item.key().clone();
        match state.enqueue(item) {
            Ok(true) => {
                self.metrics.submitted("accepted");
                self.signals.wake();
                true
            }
            Ok(false) => {
                self.metrics.submitted("refused");
                false
            }
            Err(e) => {
                self.metrics.submitted("error");
                self.errors
                    .deliver(Error::Submission {
                        key: key.to_string(),
                        source: Box::new(e),
                    })
                    .await;
                false
            }
        }
    }

    /// Stop accepting items, wait for everything waiting and in flight to
    /// finish, then resolve.
    ///
    /// The scheduling loop is not stopped; use [`shutdown`](Self::shutdown)
    /// or drop the executor for that.
    pub async fn complete(&self) -> Result<()> {
        self.completed.store(true, Ordering::SeqCst);
        info!(executor = %self.options.name, "completion requested");

        if let Some(state) = &self.state {
            state.close()?;
            loop {
                let waiting = state.queued_count()?;
                if waiting == 0 {
                    break;
                }
                if self.signals.is_cancelled() {
                    return Err(Error::Other(format!(
                        "{} was shut down with {waiting} items still waiting",
                        self.options.name
                    )));
                }
                tokio::time::sleep(self.options.scan_interval).await;
            }
        }

        self.pool.signal_complete();
        self.pool.completion().await?;
        info!(executor = %self.options.name, "executor drained");
        Ok(())
    }

    /// Resolves when the worker pool has completed, or with its fault.
    pub async fn completion(&self) -> Result<()> {
        self.pool.completion().await
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Items not yet started: buffered in the pool plus waiting for their
    /// key. Advisory only.
    pub fn pending_count(&self) -> usize {
        self.pool.queue_depth() + self.queued_count()
    }

    /// Items waiting for dispatch. Always 0 on the fast path.
    pub fn queued_count(&self) -> usize {
        self.state
            .as_ref()
            .and_then(|state| state.queued_count().ok())
            .unwrap_or(0)
    }

    /// Distinct keys waiting for dispatch. Always 0 on the fast path.
    pub fn queued_unique_count(&self) -> usize {
        self.state
            .as_ref()
            .and_then(|state| state.queued_unique_count().ok())
            .unwrap_or(0)
    }

    /// Stop the scheduling loop. Dispatched items keep running; waiting
    /// items are never dispatched.
    pub fn shutdown(&self) {
        if !self.signals.is_cancelled() {
            debug!(executor = %self.options.name, "executor shutting down");
        }
        self.signals.cancel();
    }
}

impl<T: Keyed> Drop for OrderedExecutor<T> {
    fn drop(&mut self) {
        self.signals.cancel();
    }
}
