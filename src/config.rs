//! # Engine Configuration
//!
//! Defaults for worker counts, queue capacities and watcher/report cadence.
//! An [`EngineConfig`] can be loaded from a JSON file; a missing file falls
//! back to the built-in defaults so deployments without a config directory
//! keep working.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine-wide defaults applied to nodes that do not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Default worker count per node.
  pub worker_num: usize,
  /// Default input queue capacity per node. `None` means "same as the
  /// node's worker count".
  pub queue_size: Option<usize>,
  /// Cadence of the drain watchers (upstream-end detection and group
  /// stop detection), in milliseconds.
  pub watch_interval_ms: u64,
  /// Default monitor report interval, in seconds.
  pub report_interval_secs: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      worker_num: 1,
      queue_size: None,
      watch_interval_ms: 100,
      report_interval_secs: 10,
    }
  }
}

impl EngineConfig {
  /// Reads a configuration file, failing on unreadable or malformed input.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
      path: path.display().to_string(),
      source,
    })
  }

  /// Loads a configuration file if present, falling back to defaults when
  /// the file is missing. Malformed files are reported and replaced by
  /// defaults as well.
  pub fn load(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref();
    if !path.exists() {
      return Self::default();
    }
    match Self::from_file(path) {
      Ok(config) => config,
      Err(err) => {
        tracing::warn!(error = %err, "falling back to default engine config");
        Self::default()
      }
    }
  }

  /// Watcher cadence as a [`Duration`].
  pub fn watch_interval(&self) -> Duration {
    Duration::from_millis(self.watch_interval_ms)
  }

  /// Monitor report interval as a [`Duration`].
  pub fn report_interval(&self) -> Duration {
    Duration::from_secs(self.report_interval_secs)
  }

  /// Per-node configuration seeded from these engine defaults.
  pub fn node_config(&self) -> crate::node::NodeConfig {
    let config = crate::node::NodeConfig::default()
      .with_workers(self.worker_num)
      .with_watch_interval(self.watch_interval());
    match self.queue_size {
      Some(size) => config.with_queue_size(size),
      None => config,
    }
  }
}

/// Failure to read or parse a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// The file could not be read.
  #[error("failed to read config file `{path}`")]
  Read {
    /// Path of the offending file.
    path: String,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },
  /// The file is not valid JSON for [`EngineConfig`].
  #[error("failed to parse config file `{path}`")]
  Parse {
    /// Path of the offending file.
    path: String,
    /// Underlying parse error.
    #[source]
    source: serde_json::Error,
  },
}
