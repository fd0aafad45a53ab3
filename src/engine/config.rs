//! Scheduler configuration.
//!
//! [`SchedulerConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! worker_threads = 4
//! chunk_size = 256
//! thread_name = "sim-worker"
//! ```
//!
//! Missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::engine::error::ConfigError;

/// Default number of entity slots per parallel chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Worker pool and chunking parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads in the pool; `0` lets rayon choose.
    pub worker_threads: usize,
    /// Entity slots per chunk of a parallel job.
    pub chunk_size: usize,
    /// Prefix of worker thread names.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            thread_name: "ecs-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than zero"));
        }
        Ok(())
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Sets the parallel chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}
