//! # EVENTIDE Core
//!
//! Lock-free, batch-oriented binary event stream designed for:
//! - Many producer threads appending events without locks
//! - One consumer draining every event once per frame
//! - Zero steady-state allocation (pooled batches, reused cache)
//!
//! ## Architecture Rules
//!
//! 1. **One writer per batch** - A batch buffer is owned by the thread that opened it
//! 2. **Compact records** - 8-byte header, up to 24 inline bytes, optional external payload
//! 3. **Copy external data once** - Decode first, filter, then relocate into one cache
//!
//! ## Example
//!
//! ```rust,ignore
//! use eventide_core::{EventCollector, EventStreamer, StreamConfig};
//!
//! let config = StreamConfig::default();
//! let mut stream = EventStreamer::new(&config);
//! let mut collector = EventCollector::new(&config);
//! stream.create();
//!
//! let mut batch = stream.as_writer().begin_batch();
//! batch.write_event_with(7, &42u32, &99u64);
//! batch.end_batch();
//!
//! collector.collect_all(&mut stream)?;
//! let event = collector.events().get(0).unwrap();
//! assert_eq!(event.get_data_at::<u64>(4), 99);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod collect;
pub mod config;
pub mod error;
pub mod format;
pub mod memory;
pub mod registry;
pub mod stream;

pub use buffer::{BatchBuffer, BatchCursor, ParallelBuffer, ParallelReader, ParallelWriter};
pub use collect::{CollectStats, CollectedEvents, CollectedEventsMut, EventCollector};
pub use config::StreamConfig;
pub use error::{StreamError, StreamResult};
pub use format::{
    EventDataSize, EventHeader, EventMut, EventRef, GenericEvent, ALIGNMENT, FIXED_EVENT_SIZE,
    HEADER_SIZE, MAX_EXTERNAL_DATA_BYTE_SIZE, MAX_LOCAL_DATA_BYTE_SIZE,
    MAX_LOCAL_DATA_WITH_EXTERNAL,
};
pub use memory::{BufferPool, ExternalDataCache, PoolStats};
pub use registry::{EventDataSegmentInfo, EventTypeRegistry, MAX_DATA_FIELDS};
pub use stream::{
    BatchReader, BatchWriter, EventReader, EventStreamer, EventWriter, EventWriterBuffer,
    ExternalDataWriter, StreamState,
};
