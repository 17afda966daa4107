//! Error types for orderq.
//!
//! Every failure the executor catches internally is wrapped with the
//! operation and, when known, the item key before it reaches the
//! registered error handler.

use thiserror::Error;

/// Boxed error returned by caller actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    /// A pending-state bookkeeping operation failed (poisoned lock or a
    /// broken invariant such as removing an entry that is not queued).
    #[error("pending state {operation} failed: {detail}")]
    Tracker {
        operation: &'static str,
        detail: String,
    },

    #[error("error while submitting item '{key}'")]
    Submission {
        key: String,
        #[source]
        source: Box<Error>,
    },

    #[error("error while processing item '{key}'")]
    Processing {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error(
        "error while scheduling{}",
        .key.as_deref().map(|k| format!(" item '{k}'")).unwrap_or_default()
    )]
    Scheduling {
        key: Option<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("worker pool faulted: {0}")]
    Pool(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Key of the item the failure relates to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Error::Submission { key, .. } | Error::Processing { key, .. } => Some(key),
            Error::Scheduling { key, .. } => key.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn tracker(operation: &'static str, detail: impl Into<String>) -> Self {
        Error::Tracker {
            operation,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
