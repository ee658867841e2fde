//! # Event Stream
//!
//! Typed producer and consumer views over the parallel batch buffer.
//!
//! ## Flow
//!
//! ```text
//!   producers (any thread, &EventStreamer)      consumer (&mut EventStreamer)
//!   ──────────────────────────────────────      ─────────────────────────────
//!   as_writer() ─> begin_batch()                as_reader()
//!                  write_event_*()              ├─ batch_ids()
//!                  write_header() + external    └─ begin_batch(id)
//!                  EventWriterBuffer::write()      └─ read_event() -> EventRef
//!                  end_batch() / drop
//! ```

mod builder;
mod reader;
mod streamer;
mod writer;

pub use builder::EventWriterBuffer;
pub use reader::{BatchReader, EventReader};
pub use streamer::{EventStreamer, StreamState};
pub use writer::{BatchWriter, EventWriter, ExternalDataWriter};
