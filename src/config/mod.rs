//! Executor options.
//!
//! Options can be built in code, loaded from environment variables, or
//! parsed from a TOML `[executor]` table. Every source falls back to the
//! defaults for fields it does not set, and the result is validated once.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Interval the scheduling loop idles for when nothing is waiting.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// How long a dispatch attempt waits for pool capacity before the key is
/// blocked for the rest of the pass.
pub const DEFAULT_DISPATCH_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Name used in logs, spans and metric labels.
    pub name: String,
    /// Maximum number of actions running at once. 1 selects the fast path.
    pub max_degree_of_parallelism: usize,
    /// Items the worker pool buffers before `accept` waits. `None` is
    /// effectively unbounded.
    pub bounded_capacity: Option<usize>,
    /// Idle interval of the scheduling loop, and the poll interval of
    /// `complete()` while waiting for the waiting list to drain.
    pub scan_interval: Duration,
    pub dispatch_wait: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            name: "orderq".to_string(),
            max_degree_of_parallelism: 1,
            bounded_capacity: None,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            dispatch_wait: DEFAULT_DISPATCH_WAIT,
        }
    }
}

impl ExecutorOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_degree_of_parallelism(mut self, degree: usize) -> Self {
        self.max_degree_of_parallelism = degree;
        self
    }

    pub fn with_bounded_capacity(mut self, capacity: usize) -> Self {
        self.bounded_capacity = Some(capacity);
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_dispatch_wait(mut self, wait: Duration) -> Self {
        self.dispatch_wait = wait;
        self
    }

    /// Check the options are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_degree_of_parallelism == 0 {
            return Err(Error::Config(
                "max_degree_of_parallelism must be at least 1".to_string(),
            ));
        }
        if self.bounded_capacity == Some(0) {
            return Err(Error::Config(
                "bounded_capacity must be at least 1 when set".to_string(),
            ));
        }
        if self.scan_interval.is_zero() {
            return Err(Error::Config("scan_interval must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Load options from `ORDERQ_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are an error.
    pub fn from_env() -> Result<Self> {
        let overrides = OptionsFile {
            name: std::env::var("ORDERQ_NAME").ok(),
            max_degree_of_parallelism: parse_var("ORDERQ_MAX_DEGREE")?,
            bounded_capacity: parse_var("ORDERQ_BOUNDED_CAPACITY")?,
            scan_interval_ms: parse_var("ORDERQ_SCAN_INTERVAL_MS")?,
            dispatch_wait_ms: parse_var("ORDERQ_DISPATCH_WAIT_MS")?,
        };
        overrides.apply(Self::default())
    }

    /// Parse options from the `[executor]` table of a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(source)
            .map_err(|e| Error::Config(format!("invalid executor config: {e}")))?;
        file.executor.apply(Self::default())
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    executor: OptionsFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionsFile {
    name: Option<String>,
    max_degree_of_parallelism: Option<usize>,
    bounded_capacity: Option<usize>,
    scan_interval_ms: Option<u64>,
    dispatch_wait_ms: Option<u64>,
}

impl OptionsFile {
    fn apply(self, mut options: ExecutorOptions) -> Result<ExecutorOptions> {
        if let Some(name) = self.name {
            options.name = name;
        }
        if let Some(degree) = self.max_degree_of_parallelism {
            options.max_degree_of_parallelism = degree;
        }
        if self.bounded_capacity.is_some() {
            options.bounded_capacity = self.bounded_capacity;
        }
        if let Some(ms) = self.scan_interval_ms {
            options.scan_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.dispatch_wait_ms {
            options.dispatch_wait = Duration::from_millis(ms);
        }
        options.validate()?;
        Ok(options)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = ExecutorOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.max_degree_of_parallelism, 1);
        assert_eq!(options.scan_interval, Duration::from_millis(100));
    }

    #[test]
    fn zero_degree_is_rejected() {
        let options = ExecutorOptions::default().with_max_degree_of_parallelism(0);
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let options = ExecutorOptions::default().with_bounded_capacity(0);
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let options = ExecutorOptions::from_toml_str(
            r#"
            [executor]
            name = "ledger"
            max_degree_of_parallelism = 8
            scan_interval_ms = 25
            "#,
        )
        .unwrap();

        assert_eq!(options.name, "ledger");
        assert_eq!(options.max_degree_of_parallelism, 8);
        assert_eq!(options.scan_interval, Duration::from_millis(25));
        assert_eq!(options.bounded_capacity, None);
        assert_eq!(options.dispatch_wait, DEFAULT_DISPATCH_WAIT);
    }

    #[test]
    fn toml_without_executor_table_is_default() {
        let options = ExecutorOptions::from_toml_str("").unwrap();
        assert_eq!(options, ExecutorOptions::default());
    }

    #[test]
    fn toml_unknown_field_is_rejected() {
        let result = ExecutorOptions::from_toml_str("[executor]\nmax_degre = 3\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn toml_invalid_values_fail_validation() {
        let result = ExecutorOptions::from_toml_str("[executor]\nmax_degree_of_parallelism = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
