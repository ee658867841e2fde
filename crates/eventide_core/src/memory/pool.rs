//! # Buffer Pool
//!
//! Recycles batch buffers across collection cycles.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender};

/// A lock-free pool of reusable byte buffers.
///
/// Producers acquire a buffer when they open a batch; the stream releases
/// every batch buffer when it is disposed. Released buffers are cleared and
/// kept (capacity intact) up to the pool's limit; the rest are freed.
///
/// # Thread Safety
///
/// `acquire` and `release` are lock-free and may be called from any thread.
///
/// # Example
///
/// ```rust,ignore
/// let pool = BufferPool::new(64, 4096);
///
/// let buf = pool.acquire(); // fresh 4KB buffer, or a recycled one
/// pool.release(buf);        // back in the pool for the next cycle
/// ```
#[derive(Debug)]
pub struct BufferPool {
    /// Return path for released buffers.
    free_tx: Sender<Vec<u8>>,
    /// Buffers ready for reuse.
    free_rx: Receiver<Vec<u8>>,
    /// Capacity given to freshly allocated buffers.
    buffer_capacity: usize,
    /// Buffers allocated because the pool was empty.
    allocated: AtomicU64,
    /// Buffers served from the pool.
    reused: AtomicU64,
    /// Buffers freed because the pool was full.
    discarded: AtomicU64,
}

/// Counters describing pool effectiveness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated because the pool was empty.
    pub allocated: u64,
    /// Buffers served from the pool.
    pub reused: u64,
    /// Buffers freed because the pool was full.
    pub discarded: u64,
    /// Buffers currently waiting in the pool.
    pub pooled: usize,
}

impl BufferPool {
    /// Creates a pool keeping at most `max_pooled` buffers, allocating new
    /// ones with `buffer_capacity` bytes.
    #[must_use]
    pub fn new(max_pooled: usize, buffer_capacity: usize) -> Self {
        let (free_tx, free_rx) = bounded(max_pooled);
        Self {
            free_tx,
            free_rx,
            buffer_capacity,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Takes an empty buffer from the pool, allocating one if none is free.
    #[must_use]
    pub fn acquire(&self) -> Vec<u8> {
        if let Ok(buffer) = self.free_rx.try_recv() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return buffer;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(self.buffer_capacity)
    }

    /// Returns a buffer to the pool. Its contents are discarded.
    pub fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        if self.free_tx.try_send(buffer).is_err() {
            let discarded = self.discarded.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(discarded, "buffer pool saturated, freeing batch buffer");
        }
    }

    /// Capacity given to freshly allocated buffers.
    #[inline]
    #[must_use]
    pub const fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            pooled: self.free_rx.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_allocates_with_capacity() {
        let pool = BufferPool::new(4, 256);
        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 256);
        assert_eq!(pool.stats().allocated, 1);
    }

    #[test]
    fn test_release_then_reuse() {
        let pool = BufferPool::new(4, 16);
        let mut buffer = pool.acquire();
        buffer.extend_from_slice(&[1; 100]);
        let grown = buffer.capacity();
        pool.release(buffer);
        assert_eq!(pool.stats().pooled, 1);

        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), grown);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_full_pool_discards() {
        let pool = BufferPool::new(1, 16);
        pool.release(Vec::new());
        pool.release(Vec::new());
        let stats = pool.stats();
        assert_eq!(stats.pooled, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn test_zero_sized_pool_never_keeps() {
        let pool = BufferPool::new(0, 16);
        pool.release(Vec::new());
        assert_eq!(pool.stats().pooled, 0);
        assert_eq!(pool.stats().discarded, 1);
    }
}
