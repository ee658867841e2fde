//! # Stream Configuration
//!
//! Sizing knobs for the batch buffers, the buffer pool and the
//! external-data cache. Loaded once at startup, usually from TOML:
//!
//! ```toml
//! initial_batch_capacity = 8192
//! pooled_batch_buffers = 128
//! initial_cache_capacity = 262144
//! parallel_threshold = 2048
//! max_cache_capacity = 16777216
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};
use crate::format::ALIGNMENT;

/// Configuration for an event stream and its collector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes pre-reserved for every freshly allocated batch buffer.
    pub initial_batch_capacity: usize,
    /// Maximum number of released batch buffers kept for reuse.
    pub pooled_batch_buffers: usize,
    /// Bytes pre-reserved for the persistent external-data cache.
    pub initial_cache_capacity: usize,
    /// Record count from which decode, filter and size-sum run in parallel.
    pub parallel_threshold: usize,
    /// Largest size the external-data cache may grow to. Unbounded if unset.
    pub max_cache_capacity: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_batch_capacity: 4096,
            pooled_batch_buffers: 64,
            initial_cache_capacity: 64 * 1024,
            parallel_threshold: 1024,
            max_cache_capacity: None,
        }
    }
}

impl StreamConfig {
    /// Production config: sized for dozens of producer threads per frame.
    ///
    /// Larger batch buffers avoid regrowth mid-frame, and the cache is
    /// sized for a few thousand events carrying external payloads.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            initial_batch_capacity: 16 * 1024,
            pooled_batch_buffers: 256,
            initial_cache_capacity: 1024 * 1024,
            parallel_threshold: 4096,
            max_cache_capacity: None,
        }
    }

    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConfigParse`] for malformed TOML and
    /// [`StreamError::InvalidConfig`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> StreamResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| StreamError::ConfigParse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConfigRead`] when the file cannot be read,
    /// otherwise the errors of [`StreamConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| StreamError::ConfigRead {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> StreamResult<()> {
        if self.initial_batch_capacity % ALIGNMENT != 0 {
            return Err(StreamError::InvalidConfig(format!(
                "initial_batch_capacity ({}) must be a multiple of {ALIGNMENT}",
                self.initial_batch_capacity
            )));
        }
        if self.parallel_threshold == 0 {
            return Err(StreamError::InvalidConfig(
                "parallel_threshold must be at least 1".to_string(),
            ));
        }
        if let Some(max) = self.max_cache_capacity {
            if max < self.initial_cache_capacity {
                return Err(StreamError::InvalidConfig(format!(
                    "max_cache_capacity ({max}) is below initial_cache_capacity ({})",
                    self.initial_cache_capacity
                )));
            }
        }
        Ok(())
    }
}
