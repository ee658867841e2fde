//! Stream lifecycle and the write-request counter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::reader::EventReader;
use super::writer::EventWriter;
use crate::buffer::ParallelBuffer;
use crate::config::StreamConfig;
use crate::memory::BufferPool;

/// Lifecycle state of an [`EventStreamer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// No buffer allocated yet.
    Empty,
    /// Buffer allocated; writers and readers may be requested.
    Live,
    /// Buffer released.
    Disposed,
}

/// A transient event stream shared by producers for one collection cycle.
///
/// ## State Machine
///
/// ```text
///   Empty ──create()──> Live ──dispose()──> Disposed
///                        ▲                     │
///                        └──────create()───────┘
/// ```
///
/// ## Dirty Tracking
///
/// Every [`EventStreamer::as_writer`] call bumps a counter (per call, not
/// per event). The collector skips the whole cycle while it is zero.
///
/// # Thread Safety
///
/// `EventStreamer` is `Sync`: any number of producers may call
/// `as_writer` through `&EventStreamer`. Reading and resetting need
/// `&mut EventStreamer`, which cannot coexist with a live writer.
///
/// # Example
///
/// ```rust,ignore
/// let mut stream = EventStreamer::new(&StreamConfig::default());
/// stream.create();
///
/// let mut batch = stream.as_writer().begin_batch();
/// batch.write_event_local(7, &42u32);
/// batch.end_batch();
///
/// assert!(stream.is_dirty());
/// ```
#[derive(Debug)]
pub struct EventStreamer {
    state: StreamState,
    buffer: Option<ParallelBuffer>,
    pool: Arc<BufferPool>,
    write_requests: AtomicU32,
}

impl EventStreamer {
    /// Creates an empty (not yet live) stream with its own buffer pool.
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        Self::with_pool(Arc::new(BufferPool::new(
            config.pooled_batch_buffers,
            config.initial_batch_capacity,
        )))
    }

    /// Creates an empty stream drawing batch buffers from `pool`.
    #[must_use]
    pub fn with_pool(pool: Arc<BufferPool>) -> Self {
        Self {
            state: StreamState::Empty,
            buffer: None,
            pool,
            write_requests: AtomicU32::new(0),
        }
    }

    /// Allocates the stream buffer.
    ///
    /// # Panics
    ///
    /// Panics if the stream is already live.
    pub fn create(&mut self) {
        assert!(self.state != StreamState::Live, "event stream is already live");
        self.buffer = Some(ParallelBuffer::new(Arc::clone(&self.pool)));
        self.state = StreamState::Live;
    }

    /// Whether the stream is live.
    #[inline]
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.state == StreamState::Live
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Buffer pool backing the batch buffers.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Returns a writer and records a write request.
    ///
    /// # Panics
    ///
    /// Panics if the stream is not live.
    #[must_use]
    pub fn as_writer(&self) -> EventWriter<'_> {
        let buffer = self.live_buffer();
        // Saturates: a wrapped counter would read as clean.
        let _ = self
            .write_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_add(1)));
        EventWriter::new(buffer.writer())
    }

    /// Returns a reader over every sealed batch.
    ///
    /// # Panics
    ///
    /// Panics if the stream is not live.
    #[must_use]
    pub fn as_reader(&mut self) -> EventReader<'_> {
        let state = self.state;
        match self.buffer.as_mut() {
            Some(buffer) => EventReader::new(buffer.reader()),
            None => panic!("event stream is not live ({state:?})"),
        }
    }

    /// Whether a writer was requested since the last [`EventStreamer::clear_dirty`].
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.write_requests() > 0
    }

    /// Writer requests since the last [`EventStreamer::clear_dirty`].
    #[inline]
    #[must_use]
    pub fn write_requests(&self) -> u32 {
        self.write_requests.load(Ordering::Acquire)
    }

    /// Marks the pending writes as consumed.
    #[inline]
    pub fn clear_dirty(&self) {
        self.write_requests.store(0, Ordering::Release);
    }

    /// Releases the stream buffer. Batch buffers go back to the pool.
    pub fn dispose(&mut self) {
        if self.buffer.take().is_some() {
            tracing::trace!("event stream disposed");
        }
        self.state = StreamState::Disposed;
    }

    /// Disposes the stream and allocates a fresh one.
    pub fn reset(&mut self) {
        self.dispose();
        self.create();
    }

    fn live_buffer(&self) -> &ParallelBuffer {
        match &self.buffer {
            Some(buffer) => buffer,
            None => panic!("event stream is not live ({:?})", self.state),
        }
    }
}

impl Drop for EventStreamer {
    fn drop(&mut self) {
        self.dispose();
    }
}
