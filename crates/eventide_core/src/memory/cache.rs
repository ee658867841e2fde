//! # External Data Cache
//!
//! A bump allocator holding relocated external payloads.

#![allow(unsafe_code)]

use std::ptr::{self, NonNull};

use crate::error::{StreamError, StreamResult};

/// Append-only byte storage for relocated external payloads.
///
/// Bytes are handed out by bumping an offset. The backing storage only
/// moves inside [`ExternalDataCache::reserve`], which refuses to run while
/// relocated data is live, so pointers returned by
/// [`ExternalDataCache::append`] stay valid until the next
/// [`ExternalDataCache::reset`].
///
/// # Thread Safety
///
/// Mutated only by the single-threaded relocation step.
///
/// # Example
///
/// ```rust,ignore
/// let mut cache = ExternalDataCache::new(1024);
///
/// cache.reset();
/// cache.reserve(total_external_bytes)?;
/// for event in &mut events {
///     unsafe { event.relocate_external_data_into(&mut cache) };
/// }
/// ```
#[derive(Debug, Default)]
pub struct ExternalDataCache {
    /// Backing bytes. `len()` is the usable capacity.
    storage: Vec<u8>,
    /// Bump offset.
    used: usize,
    /// Largest capacity `reserve` may grow to. `None` is unbounded.
    limit: Option<usize>,
}

impl ExternalDataCache {
    /// Creates a cache with `capacity` bytes pre-allocated.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity],
            used: 0,
            limit: None,
        }
    }

    /// Caps the capacity [`ExternalDataCache::reserve`] may grow to.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// The growth cap, if any.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes handed out since the last reset.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Bytes still available without growing.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    /// Ensures at least `additional` more bytes can be appended.
    ///
    /// Returns `true` if the storage had to grow.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::OutOfMemory`] if the growth would pass the
    /// configured limit or the allocator refuses.
    ///
    /// # Panics
    ///
    /// Panics if growth is needed while relocated data is live: moving the
    /// storage would dangle every pointer already handed out.
    pub fn reserve(&mut self, additional: usize) -> StreamResult<bool> {
        if additional <= self.remaining() {
            return Ok(false);
        }
        assert!(
            self.used == 0,
            "external data cache cannot grow while it holds {} relocated bytes",
            self.used
        );
        let target = additional;
        if self.limit.is_some_and(|limit| target > limit) {
            return Err(StreamError::OutOfMemory { requested: target });
        }
        self.storage
            .try_reserve_exact(target - self.storage.len())
            .map_err(|_| StreamError::OutOfMemory { requested: target })?;
        self.storage.resize(target, 0);
        tracing::debug!(capacity = target, "external data cache grew");
        Ok(true)
    }

    /// Copies `bytes` into the cache and returns where they landed.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `bytes.len()` bytes remain; call
    /// [`ExternalDataCache::reserve`] for the whole pass first.
    pub fn append(&mut self, bytes: &[u8]) -> NonNull<u8> {
        assert!(
            bytes.len() <= self.remaining(),
            "external data cache overflow: {} bytes requested, {} remaining; \
             reserve before relocating",
            bytes.len(),
            self.remaining()
        );
        // SAFETY: `used + len <= storage.len()`, and `as_mut_ptr` does not
        // create a reference that would invalidate earlier handed-out pointers.
        let dest = unsafe { self.storage.as_mut_ptr().add(self.used) };
        // SAFETY: `dest` is valid for `len` bytes and cannot overlap `bytes`,
        // which is borrowed immutably while the cache is borrowed mutably.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dest, bytes.len()) };
        self.used += bytes.len();
        // SAFETY: derived from a Vec buffer pointer, never null.
        unsafe { NonNull::new_unchecked(dest) }
    }

    /// Whether `ptr` points into the bytes handed out since the last reset.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.storage.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= start && addr < start + self.used
    }

    /// The bytes handed out since the last reset.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.used]
    }

    /// Forgets all relocated data. Capacity is kept.
    ///
    /// Every pointer previously returned by [`ExternalDataCache::append`]
    /// must be considered dangling afterwards.
    #[inline]
    pub fn reset(&mut self) {
        self.used = 0;
    }
}
