//! # orderq
//!
//! Key-partitioned task executor for tokio.
//!
//! Items sharing a key run one at a time in submission order; items with
//! different keys run concurrently up to a configured degree of
//! parallelism. The executor can be drained with
//! [`OrderedExecutor::complete`], and failures from actions or from the
//! executor's own bookkeeping go to an optional error handler instead of
//! ever stopping it.

pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod pool;
pub mod telemetry;
pub mod tracker;

pub use config::ExecutorOptions;
pub use error::{BoxError, Error, Result};
pub use executor::{ErrorHandler, OrderedExecutor};
pub use model::{ItemKey, Keyed};
