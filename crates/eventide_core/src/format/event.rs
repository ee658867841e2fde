//! Decoded events and the views that keep them sound.
//!
//! ## Safety Note
//!
//! A decoded [`GenericEvent`] stores a raw pointer to its external payload,
//! first into the batch buffer it was decoded from, later into whatever
//! memory it was relocated to. The raw type cannot know whether that
//! memory is still alive, so every accessor touching external bytes is
//! `unsafe`. The safe entry points are [`EventRef`] and [`EventMut`], whose
//! lifetimes are tied to the storage by construction.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use bytemuck::Pod;

use super::size::{
    EventDataSize, FIXED_EVENT_SIZE, HEADER_SIZE, MAX_LOCAL_DATA_BYTE_SIZE,
    MAX_LOCAL_DATA_WITH_EXTERNAL,
};
use crate::memory::ExternalDataCache;
use crate::registry::EventTypeRegistry;

/// The 24-byte inline area. `split` is active exactly when the size info
/// declares external data.
#[repr(C)]
#[derive(Clone, Copy)]
union InlinePayload {
    raw: [u8; MAX_LOCAL_DATA_BYTE_SIZE],
    split: SplitPayload,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SplitPayload {
    local: [u8; MAX_LOCAL_DATA_WITH_EXTERNAL],
    external: *mut u8,
}

enum Region {
    Local(usize),
    External(usize),
}

/// A decoded event: header, inline bytes and an optional external pointer.
///
/// The value is freely copyable, but its external pointer is only valid
/// while the memory it points into is alive. Right after decoding that is
/// the source batch buffer; after relocation it is the destination.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GenericEvent {
    size_info: EventDataSize,
    type_id: i32,
    payload: InlinePayload,
}

// SAFETY: the external pointer is only dereferenced through `unsafe` methods
// whose callers guarantee the storage is alive, or through views that borrow
// the storage. Moving the value between threads moves no ownership.
unsafe impl Send for GenericEvent {}
// SAFETY: `&GenericEvent` only reads the pointer value itself.
unsafe impl Sync for GenericEvent {}

impl GenericEvent {
    /// An event with type id 0 and no payload.
    pub const EMPTY: Self = Self {
        size_info: EventDataSize::EMPTY,
        type_id: 0,
        payload: InlinePayload {
            raw: [0; MAX_LOCAL_DATA_BYTE_SIZE],
        },
    };

    /// Decodes the record at the start of `record`.
    ///
    /// Header and local bytes are copied; unused inline bytes are zeroed.
    /// External bytes are not copied: the pointer slot points into `record`.
    ///
    /// # Panics
    ///
    /// Panics if `record` is shorter than the package its size info declares.
    #[must_use]
    pub fn decode(record: &[u8]) -> Self {
        let size_info = EventDataSize::read_from(record);
        size_info.validate();
        assert!(
            record.len() >= size_info.package_size(),
            "record truncated: {} bytes, size info declares {}",
            record.len(),
            size_info.package_size()
        );

        let type_id = i32::from_ne_bytes([record[4], record[5], record[6], record[7]]);
        let local_end = size_info.local_package_size();
        let local = &record[HEADER_SIZE..local_end];

        let payload = if size_info.has_external_data() {
            let mut split = SplitPayload {
                local: [0; MAX_LOCAL_DATA_WITH_EXTERNAL],
                external: record[local_end..].as_ptr().cast_mut(),
            };
            split.local[..local.len()].copy_from_slice(local);
            InlinePayload { split }
        } else {
            let mut raw = [0; MAX_LOCAL_DATA_BYTE_SIZE];
            raw[..local.len()].copy_from_slice(local);
            InlinePayload { raw }
        };

        Self {
            size_info,
            type_id,
            payload,
        }
    }

    /// The event type id.
    #[inline]
    #[must_use]
    pub const fn type_id(&self) -> i32 {
        self.type_id
    }

    /// Declared local and external sizes.
    #[inline]
    #[must_use]
    pub const fn size_info(&self) -> EventDataSize {
        self.size_info
    }

    /// Inline payload bytes in use.
    #[inline]
    #[must_use]
    pub const fn local_byte_size(&self) -> usize {
        self.size_info.local_byte_size()
    }

    /// External payload bytes.
    #[inline]
    #[must_use]
    pub const fn external_byte_size(&self) -> usize {
        self.size_info.external_byte_size()
    }

    /// Whether the event carries an external payload.
    #[inline]
    #[must_use]
    pub const fn has_external_data(&self) -> bool {
        self.size_info.has_external_data()
    }

    /// The declared local bytes.
    #[must_use]
    pub fn local_data(&self) -> &[u8] {
        let len = self.size_info.local_byte_size();
        if self.has_external_data() {
            // SAFETY: external data present, so `split` is the active variant.
            unsafe { &self.payload.split.local[..len] }
        } else {
            // SAFETY: no external data, so `raw` is the active variant.
            unsafe { &self.payload.raw[..len] }
        }
    }

    fn local_data_mut(&mut self) -> &mut [u8] {
        let len = self.size_info.local_byte_size();
        if self.has_external_data() {
            // SAFETY: external data present, so `split` is the active variant.
            unsafe { &mut self.payload.split.local[..len] }
        } else {
            // SAFETY: no external data, so `raw` is the active variant.
            unsafe { &mut self.payload.raw[..len] }
        }
    }

    /// Current location of the external payload, if any.
    #[inline]
    #[must_use]
    pub fn external_ptr(&self) -> Option<NonNull<u8>> {
        if self.has_external_data() {
            // SAFETY: external data present, so `split` is the active variant.
            NonNull::new(unsafe { self.payload.split.external })
        } else {
            None
        }
    }

    fn set_external_ptr(&mut self, external: *mut u8) {
        debug_assert!(self.has_external_data());
        // SAFETY: only called with external data present.
        let local = unsafe { self.payload.split.local };
        self.payload = InlinePayload {
            split: SplitPayload { local, external },
        };
    }

    fn locate(&self, offset: usize, len: usize) -> Region {
        let local = self.size_info.local_byte_size();
        if offset < local {
            assert!(
                offset.checked_add(len).is_some_and(|end| end <= local),
                "access of {len} bytes at offset {offset} straddles the end of \
                 {local} local bytes"
            );
            Region::Local(offset)
        } else {
            let external = self.size_info.external_byte_size();
            let at = offset - local;
            assert!(
                at.checked_add(len).is_some_and(|end| end <= external),
                "access of {len} bytes at offset {offset} runs past {local} local + \
                 {external} external bytes"
            );
            Region::External(at)
        }
    }

    /// The external payload.
    ///
    /// # Safety
    ///
    /// The memory the external pointer refers to (source batch or relocation
    /// destination) must still be alive for `'a`.
    #[must_use]
    pub unsafe fn external_data<'a>(&self) -> &'a [u8] {
        match self.external_ptr() {
            // SAFETY: caller guarantees the storage is alive; the length is
            // the declared size the storage was written with.
            Some(ptr) => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), self.external_byte_size())
            },
            None => &[],
        }
    }

    /// Reads a `T` at logical `offset`.
    ///
    /// Offsets below the local size address local bytes; the rest address
    /// external bytes, continuing where local data ends.
    ///
    /// # Safety
    ///
    /// Same as [`GenericEvent::external_data`] when the read hits external data.
    ///
    /// # Panics
    ///
    /// Panics if the read straddles the local/external boundary or runs past
    /// the declared sizes.
    #[must_use]
    pub unsafe fn get_data_at<T: Pod>(&self, offset: usize) -> T {
        let size = std::mem::size_of::<T>();
        match self.locate(offset, size) {
            Region::Local(at) => bytemuck::pod_read_unaligned(&self.local_data()[at..at + size]),
            Region::External(at) => {
                // SAFETY: forwarded to the caller.
                let external = unsafe { self.external_data() };
                bytemuck::pod_read_unaligned(&external[at..at + size])
            }
        }
    }

    /// Writes `value` at logical `offset`.
    ///
    /// # Safety
    ///
    /// When the write hits external data, that storage must be alive and not
    /// aliased by any live shared borrow. Never call this on an event that
    /// still points into a batch buffer.
    ///
    /// # Panics
    ///
    /// Panics if the write straddles the local/external boundary or runs past
    /// the declared sizes.
    pub unsafe fn set_data_at<T: Pod>(&mut self, offset: usize, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        match self.locate(offset, bytes.len()) {
            Region::Local(at) => self.local_data_mut()[at..at + bytes.len()].copy_from_slice(bytes),
            Region::External(at) => {
                if let Some(ptr) = self.external_ptr() {
                    // SAFETY: `locate` bounded the range to the declared size;
                    // the caller guarantees exclusive live storage.
                    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().add(at), bytes.len()) };
                }
            }
        }
    }

    /// Copies the external payload to `dest` and points the event there.
    ///
    /// Returns the number of bytes copied, 0 when there is no external data.
    ///
    /// # Safety
    ///
    /// The current external storage must be alive, and `dest` must be valid
    /// for writes of [`GenericEvent::external_byte_size`] bytes and outlive
    /// every later use of this event's external data.
    pub unsafe fn relocate_external_data_to(&mut self, dest: *mut u8) -> usize {
        let Some(src) = self.external_ptr() else {
            return 0;
        };
        let len = self.external_byte_size();
        // SAFETY: both ranges are valid for `len` bytes per the contract.
        unsafe { ptr::copy(src.as_ptr(), dest, len) };
        self.set_external_ptr(dest);
        len
    }

    /// Appends the external payload to `cache` and points the event there.
    ///
    /// Returns the number of bytes copied, 0 when there is no external data.
    ///
    /// # Safety
    ///
    /// The current external storage must be alive. The cache must not be
    /// reset or dropped while this event's external data is still used.
    ///
    /// # Panics
    ///
    /// Panics if the cache has not been reserved with enough room. Growing
    /// it here would move bytes already handed to earlier events.
    pub unsafe fn relocate_external_data_into(&mut self, cache: &mut ExternalDataCache) -> usize {
        if !self.has_external_data() {
            return 0;
        }
        // SAFETY: forwarded to the caller.
        let dest = cache.append(unsafe { self.external_data() });
        self.set_external_ptr(dest.as_ptr());
        self.external_byte_size()
    }
}

impl Default for GenericEvent {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for GenericEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericEvent")
            .field("type_id", &self.type_id)
            .field("local_data", &self.local_data())
            .field("external_byte_size", &self.external_byte_size())
            .field("external_ptr", &self.external_ptr())
            .finish()
    }
}

#[cfg(target_pointer_width = "64")]
const _: () = assert!(std::mem::size_of::<GenericEvent>() == FIXED_EVENT_SIZE);

/// A decoded event whose external data is borrowed for `'a`.
///
/// Produced by batch readers (borrowing the stream) and by the collector
/// (borrowing the external-data cache).
#[derive(Clone, Copy, Debug)]
pub struct EventRef<'a> {
    event: GenericEvent,
    _storage: PhantomData<&'a [u8]>,
}

impl<'a> EventRef<'a> {
    /// Decodes the record at the start of `record`.
    ///
    /// # Panics
    ///
    /// Panics if `record` is shorter than the package its size info declares.
    #[must_use]
    pub fn decode(record: &'a [u8]) -> Self {
        Self {
            event: GenericEvent::decode(record),
            _storage: PhantomData,
        }
    }

    /// Wraps a raw event.
    ///
    /// # Safety
    ///
    /// The event's external storage must stay alive for `'a`.
    pub(crate) unsafe fn from_raw(event: GenericEvent) -> Self {
        Self {
            event,
            _storage: PhantomData,
        }
    }

    /// The event type id.
    #[inline]
    #[must_use]
    pub const fn type_id(&self) -> i32 {
        self.event.type_id()
    }

    /// Declared local and external sizes.
    #[inline]
    #[must_use]
    pub const fn size_info(&self) -> EventDataSize {
        self.event.size_info()
    }

    /// Inline payload bytes in use.
    #[inline]
    #[must_use]
    pub const fn local_byte_size(&self) -> usize {
        self.event.local_byte_size()
    }

    /// External payload bytes.
    #[inline]
    #[must_use]
    pub const fn external_byte_size(&self) -> usize {
        self.event.external_byte_size()
    }

    /// The declared local bytes.
    #[must_use]
    pub fn local_data(&self) -> &[u8] {
        self.event.local_data()
    }

    /// The external payload.
    #[must_use]
    pub fn external_data(&self) -> &'a [u8] {
        // SAFETY: the storage is borrowed for 'a.
        unsafe { self.event.external_data() }
    }

    /// Reads a `T` at logical `offset`. See [`GenericEvent::get_data_at`].
    ///
    /// # Panics
    ///
    /// Panics if the read straddles the local/external boundary or runs past
    /// the declared sizes.
    #[must_use]
    pub fn get_data_at<T: Pod>(&self, offset: usize) -> T {
        // SAFETY: the storage is borrowed for 'a.
        unsafe { self.event.get_data_at(offset) }
    }

    /// Reads field `index` of this event's registered layout.
    ///
    /// # Panics
    ///
    /// Panics if the type is not registered, `index` is out of range, or the
    /// field size differs from `size_of::<T>()`.
    #[must_use]
    pub fn get_field<T: Pod>(&self, registry: &EventTypeRegistry, index: usize) -> T {
        let offset = registry.layout_of(self.type_id()).get_offset::<T>(index);
        self.get_data_at(offset)
    }

    /// The raw event, detached from the borrow.
    #[inline]
    #[must_use]
    pub const fn into_raw(self) -> GenericEvent {
        self.event
    }
}

/// Mutable access to a relocated event and its external data.
#[derive(Debug)]
pub struct EventMut<'a> {
    event: &'a mut GenericEvent,
    _storage: PhantomData<&'a mut [u8]>,
}

impl<'a> EventMut<'a> {
    /// Wraps a raw event for mutation.
    ///
    /// # Safety
    ///
    /// The event's external storage must be alive and exclusively borrowed
    /// for `'a`.
    pub(crate) unsafe fn from_raw(event: &'a mut GenericEvent) -> Self {
        Self {
            event,
            _storage: PhantomData,
        }
    }

    /// Shared view of the same event.
    #[must_use]
    pub fn view(&self) -> EventRef<'_> {
        // SAFETY: the storage is borrowed for at least as long as `self`.
        unsafe { EventRef::from_raw(*self.event) }
    }

    /// The event type id.
    #[inline]
    #[must_use]
    pub fn type_id(&self) -> i32 {
        self.event.type_id()
    }

    /// Reads a `T` at logical `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the read straddles the local/external boundary or runs past
    /// the declared sizes.
    #[must_use]
    pub fn get_data_at<T: Pod>(&self, offset: usize) -> T {
        self.view().get_data_at(offset)
    }

    /// Writes `value` at logical `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the write straddles the local/external boundary or runs past
    /// the declared sizes.
    pub fn set_data_at<T: Pod>(&mut self, offset: usize, value: &T) {
        // SAFETY: the storage is exclusively borrowed for 'a.
        unsafe { self.event.set_data_at(offset, value) }
    }

    /// Writes field `index` of this event's registered layout.
    ///
    /// # Panics
    ///
    /// Panics if the type is not registered, `index` is out of range, or the
    /// field size differs from `size_of::<T>()`.
    pub fn set_field<T: Pod>(&mut self, registry: &EventTypeRegistry, index: usize, value: &T) {
        let offset = registry.layout_of(self.type_id()).get_offset::<T>(index);
        self.set_data_at(offset, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a wire record by hand: header, local bytes, external bytes, padding.
    fn record(type_id: i32, local: &[u8], external: &[u8]) -> Vec<u8> {
        let size = EventDataSize::new(local.len(), external.len());
        let mut bytes = Vec::new();
        bytes.extend_from_slice(bytemuck::bytes_of(&size));
        bytes.extend_from_slice(&type_id.to_ne_bytes());
        bytes.extend_from_slice(local);
        bytes.extend_from_slice(external);
        bytes.resize(size.aligned_package_size(), 0);
        bytes
    }

    #[test]
    fn test_decode_local_only() {
        let bytes = record(5, &42u32.to_ne_bytes(), &[]);
        let event = GenericEvent::decode(&bytes);
        assert_eq!(event.type_id(), 5);
        assert_eq!(event.local_byte_size(), 4);
        assert!(!event.has_external_data());
        assert!(event.external_ptr().is_none());
        // SAFETY: no external data is touched.
        assert_eq!(unsafe { event.get_data_at::<u32>(0) }, 42);
    }

    #[test]
    fn test_decode_points_into_source() {
        let bytes = record(9, &[1, 2], &[10, 20, 30]);
        let event = GenericEvent::decode(&bytes);
        let ptr = event.external_ptr().unwrap();
        assert_eq!(ptr.as_ptr().cast_const(), bytes[HEADER_SIZE + 2..].as_ptr());
        // SAFETY: `bytes` is alive.
        assert_eq!(unsafe { event.external_data() }, &[10, 20, 30]);
    }

    #[test]
    fn test_full_inline_area_without_external() {
        let local: Vec<u8> = (0..24).collect();
        let bytes = record(1, &local, &[]);
        let event = EventRef::decode(&bytes);
        assert_eq!(event.local_data(), local.as_slice());
        assert_eq!(event.get_data_at::<u64>(16), u64::from_ne_bytes([16, 17, 18, 19, 20, 21, 22, 23]));
    }

    #[test]
    fn test_logical_offsets_continue_into_external() {
        let bytes = record(7, &42u32.to_ne_bytes(), &99u64.to_ne_bytes());
        let event = EventRef::decode(&bytes);
        assert_eq!(event.get_data_at::<u32>(0), 42);
        assert_eq!(event.get_data_at::<u64>(4), 99);
    }

    #[test]
    fn test_relocate_to_raw_destination() {
        let bytes = record(3, &[], &[7, 8, 9, 10]);
        let mut event = GenericEvent::decode(&bytes);
        let mut dest = [0u8; 4];
        // SAFETY: `bytes` is alive and `dest` holds 4 bytes.
        let copied = unsafe { event.relocate_external_data_to(dest.as_mut_ptr()) };
        assert_eq!(copied, 4);
        assert_eq!(dest, [7, 8, 9, 10]);
        assert_eq!(event.external_ptr().unwrap().as_ptr(), dest.as_mut_ptr());
    }

    #[test]
    fn test_relocate_without_external_is_noop() {
        let bytes = record(3, &[1], &[]);
        let mut event = GenericEvent::decode(&bytes);
        let mut cache = ExternalDataCache::new(0);
        // SAFETY: nothing is read.
        assert_eq!(unsafe { event.relocate_external_data_into(&mut cache) }, 0);
        assert_eq!(cache.used(), 0);
    }

    #[test]
    fn test_relocate_into_cache_survives_source_drop() {
        let mut cache = ExternalDataCache::new(16);
        let mut event = {
            let bytes = record(3, &[1], &[4, 5, 6]);
            let mut event = GenericEvent::decode(&bytes);
            // SAFETY: `bytes` is alive during relocation.
            unsafe { event.relocate_external_data_into(&mut cache) };
            event
        };
        assert!(cache.contains(event.external_ptr().unwrap()));
        // SAFETY: the cache is alive and not otherwise borrowed.
        unsafe {
            assert_eq!(event.external_data(), &[4, 5, 6]);
            event.set_data_at(2, &9u8);
            assert_eq!(event.get_data_at::<u8>(2), 9);
        }
        assert_eq!(cache.as_slice(), &[4, 9, 6]);
    }

    #[test]
    #[should_panic(expected = "straddles the end of 2 local bytes")]
    fn test_read_straddling_boundary_panics() {
        let bytes = record(1, &[1, 2], &[3, 4]);
        let _ = EventRef::decode(&bytes).get_data_at::<u16>(1);
    }

    #[test]
    #[should_panic(expected = "runs past 4 local + 0 external bytes")]
    fn test_read_past_declared_size_panics() {
        // Physical inline capacity is 24, but only 4 bytes are declared.
        let bytes = record(1, &[1, 2, 3, 4], &[]);
        let _ = EventRef::decode(&bytes).get_data_at::<u32>(4);
    }

    #[test]
    #[should_panic(expected = "runs past 0 local + 8 external bytes")]
    fn test_wrapping_offset_panics() {
        let bytes = record(1, &[], &[0xAA; 8]);
        let _ = EventRef::decode(&bytes).get_data_at::<u64>(usize::MAX - 7);
    }

    #[test]
    #[should_panic(expected = "record truncated")]
    fn test_truncated_record_panics() {
        let bytes = record(1, &[], &[1, 2, 3, 4, 5, 6, 7, 8]);
        let _ = GenericEvent::decode(&bytes[..12]);
    }
}
