//! # Parallel Batch Buffer
//!
//! NO LOCKS ON THE PRODUCER PATH.
//!
//! ## The Problem
//!
//! ```text
//! Thread 1:  append records ─┐
//! Thread 2:  append records ─┼─> one shared buffer?  → contention / interleaving
//! Thread N:  append records ─┘
//! ```
//!
//! ## The Solution: Owned Batches
//!
//! ```text
//!   begin_batch()                        end_batch() / drop
//!   ┌──────────────┐   append records   ┌──────────────┐
//!   │ id = N (atom)│ ─────────────────> │ sealed batch │ ──> lock-free channel
//!   │ buffer (pool)│   (thread-owned)   └──────────────┘
//!   └──────────────┘
//!
//!   reader() (&mut, after all producers are done)
//!   └─ drain channel → batches[id] → read back in write order
//! ```
//!
//! A batch buffer is owned by the thread that opened it until it is sealed,
//! so two writers can never interleave inside one batch. The consumer needs
//! `&mut ParallelBuffer`, which the borrow checker only grants once every
//! writer borrow has ended.

mod reader;
mod writer;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::memory::BufferPool;

pub use reader::{BatchCursor, ParallelReader};
pub use writer::{BatchBuffer, ParallelWriter};

/// A batch handed back by its writer.
#[derive(Debug)]
pub(crate) struct SealedBatch {
    bytes: Vec<u8>,
    records: usize,
}

/// A set of independent append-only byte regions, one per batch id.
///
/// # Usage
///
/// ```rust,ignore
/// let mut buffer = ParallelBuffer::new(Arc::new(BufferPool::new(16, 4096)));
///
/// std::thread::scope(|s| {
///     let writer = buffer.writer();
///     s.spawn(move || {
///         let mut batch = writer.begin_batch();
///         batch.allocate_record(8).fill(0);
///     });
/// });
///
/// let reader = buffer.reader();
/// for id in reader.batch_ids() {
///     let mut cursor = reader.begin_batch(id);
///     while cursor.has_remaining() {
///         let record = cursor.next_record();
///     }
/// }
/// ```
#[derive(Debug)]
pub struct ParallelBuffer {
    /// Source of batch buffers, and where they go back on drop.
    pool: Arc<BufferPool>,
    /// Next batch id to hand out.
    next_batch_id: AtomicUsize,
    /// Batches begun but not yet sealed.
    open_batches: AtomicUsize,
    /// Sealed batches in flight from writers.
    sealed_tx: Sender<(usize, SealedBatch)>,
    sealed_rx: Receiver<(usize, SealedBatch)>,
    /// Gathered batches, indexed by id.
    batches: Vec<Option<SealedBatch>>,
}

impl ParallelBuffer {
    /// Creates an empty buffer drawing batch storage from `pool`.
    #[must_use]
    pub fn new(pool: Arc<BufferPool>) -> Self {
        let (sealed_tx, sealed_rx) = unbounded();
        Self {
            pool,
            next_batch_id: AtomicUsize::new(0),
            open_batches: AtomicUsize::new(0),
            sealed_tx,
            sealed_rx,
            batches: Vec::new(),
        }
    }

    /// Shared writer view. Any number of threads may hold one.
    #[inline]
    #[must_use]
    pub fn writer(&self) -> ParallelWriter<'_> {
        ParallelWriter::new(self)
    }

    /// Gathers every sealed batch and returns a reader over them.
    ///
    /// # Panics
    ///
    /// Panics if a batch is still open, which only happens when a batch
    /// handle was leaked with `mem::forget`.
    pub fn reader(&mut self) -> ParallelReader<'_> {
        self.gather();
        ParallelReader::new(&self.batches)
    }

    /// Number of batch ids handed out so far.
    #[inline]
    #[must_use]
    pub fn assigned_batches(&self) -> usize {
        self.next_batch_id.load(Ordering::Acquire)
    }

    /// Number of batches currently open.
    #[inline]
    #[must_use]
    pub fn open_batches(&self) -> usize {
        self.open_batches.load(Ordering::Acquire)
    }

    fn gather(&mut self) {
        let open = self.open_batches();
        assert!(open == 0, "cannot read while {open} batches are still open");

        let assigned = self.assigned_batches();
        if self.batches.len() < assigned {
            self.batches.resize_with(assigned, || None);
        }
        for (id, batch) in self.sealed_rx.try_iter() {
            self.batches[id] = Some(batch);
        }
    }
}

impl Drop for ParallelBuffer {
    fn drop(&mut self) {
        for batch in self.batches.drain(..).flatten() {
            self.pool.release(batch.bytes);
        }
        for (_, batch) in self.sealed_rx.try_iter() {
            self.pool.release(batch.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::EventDataSize;

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new(8, 64))
    }

    /// Writes a header-only record tagged with `type_id`.
    fn write_tag(batch: &mut BatchBuffer<'_>, type_id: i32) {
        let record = batch.allocate_record(8);
        record[..4].copy_from_slice(bytemuck::bytes_of(&EventDataSize::EMPTY));
        record[4..8].copy_from_slice(&type_id.to_ne_bytes());
    }

    fn read_tags(reader: &ParallelReader<'_>, id: usize) -> Vec<i32> {
        let mut cursor = reader.begin_batch(id);
        let mut tags = Vec::new();
        while cursor.has_remaining() {
            let record = cursor.next_record();
            tags.push(i32::from_ne_bytes([record[4], record[5], record[6], record[7]]));
        }
        tags
    }

    #[test]
    fn test_batch_ids_are_sequential() {
        let buffer = ParallelBuffer::new(pool());
        let writer = buffer.writer();
        let a = writer.begin_batch();
        let b = writer.begin_batch();
        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);
        assert_eq!(buffer.open_batches(), 2);
        drop(a);
        b.end();
        assert_eq!(buffer.open_batches(), 0);
        assert_eq!(buffer.assigned_batches(), 2);
    }

    #[test]
    fn test_batch_isolation() {
        let mut buffer = ParallelBuffer::new(pool());
        {
            let writer = buffer.writer();
            let mut a = writer.begin_batch();
            let mut b = writer.begin_batch();
            write_tag(&mut a, 1);
            write_tag(&mut b, 100);
            write_tag(&mut a, 2);
            write_tag(&mut b, 200);
        }

        let reader = buffer.reader();
        assert_eq!(reader.batch_ids().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(read_tags(&reader, 0), vec![1, 2]);
        assert_eq!(read_tags(&reader, 1), vec![100, 200]);
        assert_eq!(reader.record_count(0), 2);
        assert_eq!(reader.total_records(), 4);
    }

    #[test]
    fn test_empty_batches_are_not_listed() {
        let mut buffer = ParallelBuffer::new(pool());
        {
            let writer = buffer.writer();
            writer.begin_batch().end();
            let mut batch = writer.begin_batch();
            write_tag(&mut batch, 5);
        }

        let reader = buffer.reader();
        assert_eq!(reader.assigned_batches(), 2);
        assert_eq!(reader.batch_ids().collect::<Vec<_>>(), vec![1]);
        assert!(!reader.begin_batch(0).has_remaining());
    }

    #[test]
    fn test_concurrent_writers() {
        const THREADS: i32 = 8;
        const PER_THREAD: i32 = 500;

        let mut buffer = ParallelBuffer::new(pool());
        std::thread::scope(|s| {
            for t in 0..THREADS {
                let writer = buffer.writer();
                s.spawn(move || {
                    let mut batch = writer.begin_batch();
                    for i in 0..PER_THREAD {
                        write_tag(&mut batch, t * PER_THREAD + i);
                    }
                });
            }
        });

        let reader = buffer.reader();
        assert_eq!(reader.batch_count(), THREADS as usize);
        let mut all: Vec<i32> = reader.batch_ids().flat_map(|id| read_tags(&reader, id)).collect();
        for id in reader.batch_ids() {
            let tags = read_tags(&reader, id);
            assert!(tags.windows(2).all(|w| w[0] + 1 == w[1]), "batch {id} out of order");
        }
        all.sort_unstable();
        assert_eq!(all, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_returns_buffers_to_pool() {
        let pool = pool();
        {
            let mut buffer = ParallelBuffer::new(Arc::clone(&pool));
            {
                let writer = buffer.writer();
                write_tag(&mut writer.begin_batch(), 1);
                write_tag(&mut writer.begin_batch(), 2);
            }
            let _ = buffer.reader();
            // A third batch sealed after gathering still goes back to the pool.
            write_tag(&mut buffer.writer().begin_batch(), 3);
        }
        assert_eq!(pool.stats().pooled, 3);
    }

    #[test]
    #[should_panic(expected = "batches are still open")]
    fn test_leaked_batch_blocks_reading() {
        let mut buffer = ParallelBuffer::new(pool());
        std::mem::forget(buffer.writer().begin_batch());
        let _ = buffer.reader();
    }

    #[test]
    #[should_panic(expected = "was never assigned")]
    fn test_unknown_batch_id_panics() {
        let mut buffer = ParallelBuffer::new(pool());
        let reader = buffer.reader();
        let _ = reader.begin_batch(3);
    }
}
