//! # Stream Error Types
//!
//! Recoverable failures of the event stream.
//!
//! Size-limit and registration violations are programmer errors and panic at
//! the call site. Only resource exhaustion and configuration problems are
//! reported through [`StreamError`].

use thiserror::Error;

/// Errors that can occur in the event stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The allocator could not provide the requested memory.
    #[error("out of memory: failed to reserve {requested} bytes")]
    OutOfMemory {
        /// Total bytes the failed reservation asked for.
        requested: usize,
    },

    /// Configuration file could not be read.
    #[error("failed to read configuration {path}: {reason}")]
    ConfigRead {
        /// Path of the configuration file.
        path: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// Configuration file is not valid TOML for [`crate::StreamConfig`].
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but holds values the stream cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
