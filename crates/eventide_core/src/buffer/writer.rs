//! Producer side of the parallel buffer.

use std::sync::atomic::Ordering;

use super::{ParallelBuffer, SealedBatch};
use crate::format::{ALIGNMENT, HEADER_SIZE};

/// Shared handle for opening batches.
///
/// Copyable, so each producer thread can take its own.
#[derive(Clone, Copy, Debug)]
pub struct ParallelWriter<'a> {
    buffer: &'a ParallelBuffer,
}

impl<'a> ParallelWriter<'a> {
    pub(super) fn new(buffer: &'a ParallelBuffer) -> Self {
        Self { buffer }
    }

    /// Opens a new batch with a fresh id.
    ///
    /// Batch ids are unique and increasing across all threads.
    #[must_use]
    pub fn begin_batch(&self) -> BatchBuffer<'a> {
        let id = self.buffer.next_batch_id.fetch_add(1, Ordering::AcqRel);
        self.buffer.open_batches.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(batch = id, "batch opened");
        BatchBuffer {
            buffer: self.buffer,
            id,
            bytes: self.buffer.pool.acquire(),
            records: 0,
        }
    }
}

/// An open batch, owned by one thread.
///
/// Records are appended contiguously. The batch is sealed and handed to the
/// consumer side when this handle is dropped or [`BatchBuffer::end`] is
/// called.
#[derive(Debug)]
pub struct BatchBuffer<'a> {
    buffer: &'a ParallelBuffer,
    id: usize,
    bytes: Vec<u8>,
    records: usize,
}

impl BatchBuffer<'_> {
    /// This batch's id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Bytes written so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether no record has been allocated yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Records allocated so far.
    #[inline]
    #[must_use]
    pub const fn record_count(&self) -> usize {
        self.records
    }

    /// Appends a zeroed record of `size` bytes and returns it for filling.
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than a header or not a multiple of the
    /// record alignment.
    pub fn allocate_record(&mut self, size: usize) -> &mut [u8] {
        assert!(
            size >= HEADER_SIZE && size % ALIGNMENT == 0,
            "record size {size} must be a multiple of {ALIGNMENT} and at least {HEADER_SIZE}"
        );
        let start = self.bytes.len();
        self.bytes.resize(start + size, 0);
        self.records += 1;
        &mut self.bytes[start..]
    }

    /// Seals the batch.
    #[inline]
    pub fn end(self) {}
}

impl Drop for BatchBuffer<'_> {
    fn drop(&mut self) {
        let batch = SealedBatch {
            bytes: std::mem::take(&mut self.bytes),
            records: self.records,
        };
        tracing::trace!(batch = self.id, records = batch.records, "batch sealed");
        // The receiver lives in the same ParallelBuffer, so this cannot fail
        // while `self.buffer` is borrowed.
        if let Err(err) = self.buffer.sealed_tx.send((self.id, batch)) {
            self.buffer.pool.release((err.0).1.bytes);
        }
        self.buffer.open_batches.fetch_sub(1, Ordering::AcqRel);
    }
}
