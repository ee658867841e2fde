//! Producer-side event envelope.

use bytemuck::{Pod, Zeroable};

use super::size::{EventDataSize, HEADER_SIZE, MAX_LOCAL_DATA_BYTE_SIZE};

/// An event under construction in a producer's local memory.
///
/// Holds the size info, the type id and the full 24-byte inline area.
/// Only the first [`EventDataSize::local_package_size`] bytes are ever
/// serialized.
///
/// # Example
///
/// ```rust,ignore
/// let mut header = EventHeader::new(7);
/// header.set_local_data_at(0, &42u32);
/// header.set_external_byte_size(8);
///
/// let mut ext = batch.write_header(&header);
/// ext.write_external_data(&99u64);
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct EventHeader {
    size_info: EventDataSize,
    type_id: i32,
    local_data: [u8; MAX_LOCAL_DATA_BYTE_SIZE],
}

impl EventHeader {
    /// Creates an empty header for `type_id`.
    ///
    /// # Panics
    ///
    /// Panics if `type_id` is negative.
    #[must_use]
    pub fn new(type_id: i32) -> Self {
        assert!(type_id >= 0, "event type id {type_id} must not be negative");
        Self {
            type_id,
            ..Self::zeroed()
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

    /// Declares how many external bytes will follow this header.
    ///
    /// # Panics
    ///
    /// Panics if `size` exceeds the external limit, or if the local data
    /// already written leaves no room for the external pointer slot.
    pub fn set_external_byte_size(&mut self, size: usize) {
        self.size_info.set_external_byte_size(size);
    }

    /// Writes `value` at `offset` of the inline area.
    ///
    /// The local size grows to `offset + size_of::<T>()` if that is larger.
    ///
    /// # Panics
    ///
    /// Panics if the write would run past the 24-byte inline area.
    pub fn set_local_data_at<T: Pod>(&mut self, offset: usize, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        let end = offset.saturating_add(bytes.len());
        assert!(
            end <= MAX_LOCAL_DATA_BYTE_SIZE,
            "local write of {} bytes at offset {offset} runs past the \
             {MAX_LOCAL_DATA_BYTE_SIZE}-byte inline area",
            bytes.len()
        );
        self.local_data[offset..end].copy_from_slice(bytes);
        self.size_info.grow_local_to(end);
    }

    /// Reads a `T` at `offset` of the inline area.
    ///
    /// Checks the physical 24-byte capacity, not the declared local size.
    ///
    /// # Panics
    ///
    /// Panics if the read would run past the 24-byte inline area.
    #[must_use]
    pub fn get_local_data_at<T: Pod>(&self, offset: usize) -> T {
        let end = offset.saturating_add(std::mem::size_of::<T>());
        assert!(
            end <= MAX_LOCAL_DATA_BYTE_SIZE,
            "local read of {} bytes at offset {offset} runs past the \
             {MAX_LOCAL_DATA_BYTE_SIZE}-byte inline area",
            std::mem::size_of::<T>()
        );
        bytemuck::pod_read_unaligned(&self.local_data[offset..end])
    }

    /// The declared local bytes.
    #[inline]
    #[must_use]
    pub fn local_data(&self) -> &[u8] {
        &self.local_data[..self.size_info.local_byte_size()]
    }

    /// Header and local bytes exactly as they appear on the wire.
    #[inline]
    #[must_use]
    pub fn wire_prefix(&self) -> &[u8] {
        &bytemuck::bytes_of(self)[..self.size_info.local_package_size()]
    }
}

const _: () = assert!(std::mem::size_of::<EventHeader>() == HEADER_SIZE + MAX_LOCAL_DATA_BYTE_SIZE);
