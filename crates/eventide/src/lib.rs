//! # EVENTIDE
//!
//! Frame-driven integration of the event stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FRAME STREAM                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐    │
//! │  │   Producers     │     │   Collector     │     │   Consumer      │    │
//! │  │                 │────>│                 │────>│                 │    │
//! │  │  • 1 batch each │     │  • Decode       │     │  • Iterate      │    │
//! │  │  • No locks     │     │  • Filter       │     │  • Field access │    │
//! │  │  • Pooled bufs  │     │  • Relocate     │     │  • Stats        │    │
//! │  └─────────────────┘     └─────────────────┘     └─────────────────┘    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `frame`: Per-frame collection and timing

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod frame;

// Re-export the stream
pub use eventide_core as core;

// Re-export commonly used types
pub use frame::{
    FrameStats, FrameStatsAccumulator, FrameStream, FrameStreamConfig, MAX_COLLECT_TIME,
    TARGET_FRAME_TIME,
};
