//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.

use std::{num::NonZeroU32, path::PathBuf, time::Duration};

use rustc_hash::FxHashSet;
use serde::Deserialize;
use tally_counter::{Counter, DEFAULT_WINDOW_SIZE, Kind, Name, name};

use crate::{aggregator, recorder};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// A configured counter or operation name is invalid.
    #[error("Invalid counter name: {0}")]
    Name(#[from] name::Error),
    /// Two counters share a name.
    #[error("Duplicate counter name found: {0}")]
    DuplicateCounter(String),
}

fn default_window_size() -> NonZeroU32 {
    DEFAULT_WINDOW_SIZE
}

fn default_lease_seconds() -> u64 {
    480
}

fn default_lease_max_tasks() -> usize {
    1_000
}

fn default_base_dir() -> String {
    "/_tally/stats/counters".to_string()
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("/var/lib/tally/queue")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/tally/store")
}

/// Main configuration struct for this program
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The size of one aggregation window, in seconds.
    #[serde(default = "default_window_size")]
    pub window_size_seconds: NonZeroU32,
    /// How long the aggregator holds a lease on queued batches.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
    /// How long after its window closes a batch becomes visible to the
    /// aggregator. Defaults to three windows.
    #[serde(default)]
    pub lease_buffer_seconds: Option<u64>,
    /// The most batches the aggregator leases for one window per cycle.
    #[serde(default = "default_lease_max_tasks")]
    pub lease_max_tasks: usize,
    /// Store directory under which permanent records are kept.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    /// The durable queue.
    #[serde(default)]
    pub queue: QueueConfig,
    /// The permanent store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Counters the aggregator merges.
    #[serde(default)]
    pub counters: Vec<CounterConfig>,
    /// Operations whose invocation and latency counters the aggregator
    /// merges, see [`recorder::operation_counters`].
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Configuration of the directory-backed queue
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// The queue directory.
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
        }
    }
}

/// Configuration of the directory-backed store
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// The store root directory.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// A counter registered with the aggregator
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CounterConfig {
    /// The counter name.
    pub name: String,
    /// The counter kind.
    pub kind: Kind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size_seconds: default_window_size(),
            lease_seconds: default_lease_seconds(),
            lease_buffer_seconds: None,
            lease_max_tasks: default_lease_max_tasks(),
            base_dir: default_base_dir(),
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
            counters: Vec::new(),
            operations: Vec::new(),
        }
    }
}

impl Config {
    /// Parse and validate a YAML configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` is not a valid configuration.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for mistakes deserialization cannot catch.
    ///
    /// # Errors
    ///
    /// Returns an error if any counter name is invalid or registered twice.
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = FxHashSet::default();
        for counter in self.counters()? {
            if !seen.insert(counter.name().clone()) {
                return Err(Error::DuplicateCounter(counter.name().to_string()));
            }
        }
        Ok(())
    }

    /// Fresh counters for every configured counter and operation.
    ///
    /// # Errors
    ///
    /// Returns an error if any counter name is invalid.
    pub fn counters(&self) -> Result<Vec<Counter>, Error> {
        let mut counters = Vec::with_capacity(self.counters.len() + 2 * self.operations.len());
        for counter in &self.counters {
            counters.push(Counter::with_name(counter.kind, Name::new(counter.name.as_str())?));
        }
        counters.extend(recorder::operation_counters(&self.operations)?);
        Ok(counters)
    }

    /// How long after its window closes a batch becomes visible.
    #[must_use]
    pub fn lease_buffer(&self) -> Duration {
        let seconds = self
            .lease_buffer_seconds
            .unwrap_or_else(|| 3 * u64::from(self.window_size_seconds.get()));
        Duration::from_secs(seconds)
    }

    /// Settings for an [`aggregator::Aggregator`].
    #[must_use]
    pub fn aggregator_settings(&self) -> aggregator::Settings {
        aggregator::Settings {
            window_size: self.window_size_seconds,
            lease: Duration::from_secs(self.lease_seconds),
            lease_max_tasks: self.lease_max_tasks,
            base_dir: self.base_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes() -> Result<(), Error> {
        let contents = r#"
window_size_seconds: 60
lease_buffer_seconds: 5
base_dir: "/stats"
queue:
  path: "/tmp/tally/queue"
store:
  path: "/tmp/tally/store"
counters:
  - name: "page/view"
    kind: sum
  - name: "page/size"
    kind: average
  - name: "page/render/latency"
    kind: average_timing
operations:
  - "files/get"
"#;
        let config = Config::parse(contents)?;
        assert_eq!(config.window_size_seconds.get(), 60);
        assert_eq!(config.lease_seconds, 480);
        assert_eq!(config.lease_buffer(), Duration::from_secs(5));
        assert_eq!(config.lease_max_tasks, 1_000);
        assert_eq!(config.base_dir, "/stats");
        assert_eq!(config.queue.path, PathBuf::from("/tmp/tally/queue"));
        assert_eq!(config.store.path, PathBuf::from("/tmp/tally/store"));
        assert_eq!(
            config.counters[2],
            CounterConfig {
                name: "page/render/latency".to_string(),
                kind: Kind::AverageTiming,
            }
        );

        let counters = config.counters()?;
        let names: Vec<&str> = counters.iter().map(|c| c.name().as_str()).collect();
        assert_eq!(
            names,
            vec![
                "page/view",
                "page/size",
                "page/render/latency",
                "files/get",
                "files/get/latency",
            ]
        );
        Ok(())
    }

    #[test]
    fn empty_config_takes_defaults() -> Result<(), Error> {
        let config = Config::parse("{}")?;
        assert_eq!(config, Config::default());
        assert_eq!(config.window_size_seconds, DEFAULT_WINDOW_SIZE);
        assert_eq!(config.lease_buffer(), Duration::from_secs(30));

        let settings = config.aggregator_settings();
        assert_eq!(settings.lease, Duration::from_secs(480));
        assert_eq!(settings.lease_max_tasks, 1_000);
        assert_eq!(settings.base_dir, "/_tally/stats/counters");
        Ok(())
    }

    #[test]
    fn rejects_unknown_fields_and_zero_window() {
        assert!(matches!(
            Config::parse("window_size: 10"),
            Err(Error::SerdeYaml(_))
        ));
        assert!(matches!(
            Config::parse("window_size_seconds: 0"),
            Err(Error::SerdeYaml(_))
        ));
        assert!(matches!(
            Config::parse("counters: [{name: x, kind: median}]"),
            Err(Error::SerdeYaml(_))
        ));
    }

    #[test]
    fn rejects_invalid_and_duplicate_names() {
        assert!(matches!(
            Config::parse("counters: [{name: 'a:b', kind: sum}]"),
            Err(Error::Name(_))
        ));
        assert!(matches!(
            Config::parse("counters: [{name: a, kind: sum}, {name: a, kind: average}]"),
            Err(Error::DuplicateCounter(name)) if name == "a"
        ));
        // an operation's invocation counter collides with a plain counter
        assert!(matches!(
            Config::parse("counters: [{name: get, kind: sum}]\noperations: [get]"),
            Err(Error::DuplicateCounter(name)) if name == "get"
        ));
    }
}
