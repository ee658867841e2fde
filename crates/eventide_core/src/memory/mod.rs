//! # Memory Management
//!
//! The two allocation lifetimes of the stream.
//!
//! ## Design
//!
//! - **Temporary**: batch buffers live for one collection cycle. Released
//!   buffers go back to a [`BufferPool`] so steady-state cycles allocate
//!   nothing.
//! - **Persistent**: the [`ExternalDataCache`] owns relocated external
//!   payloads between cycles. It grows once per cycle, before relocation,
//!   and is reset (not freed) at the start of the next one.

mod cache;
mod pool;

pub use cache::ExternalDataCache;
pub use pool::{BufferPool, PoolStats};
