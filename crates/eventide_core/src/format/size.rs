//! Size metadata shared by every record.

use bytemuck::{Pod, Zeroable};

/// Package boundary alignment in bytes.
pub const ALIGNMENT: usize = 8;

/// Size of the packed [`EventDataSize`] prefix.
pub const SIZE_INFO_SIZE: usize = 4;

/// Size of the serialized header: size info plus the `i32` type id.
pub const HEADER_SIZE: usize = SIZE_INFO_SIZE + 4;

/// Inline payload capacity of an event.
pub const MAX_LOCAL_DATA_BYTE_SIZE: usize = 24;

/// Inline payload capacity once the trailing 8 bytes hold the external pointer.
pub const MAX_LOCAL_DATA_WITH_EXTERNAL: usize = MAX_LOCAL_DATA_BYTE_SIZE - 8;

/// Largest external payload a single event can carry.
pub const MAX_EXTERNAL_DATA_BYTE_SIZE: usize = u16::MAX as usize;

/// Size of a decoded event value (header plus full inline area).
pub const FIXED_EVENT_SIZE: usize = HEADER_SIZE + MAX_LOCAL_DATA_BYTE_SIZE;

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
#[inline]
#[must_use]
pub const fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Local and external payload sizes of one event.
///
/// The field widths are part of the wire format: one byte bounds the
/// inline payload, two bytes bound the external payload to 64KB.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct EventDataSize {
    local_byte_size: u8,
    reserved: u8,
    external_byte_size: u16,
}

impl EventDataSize {
    /// Size info of a header-only event.
    pub const EMPTY: Self = Self {
        local_byte_size: 0,
        reserved: 0,
        external_byte_size: 0,
    };

    /// Creates size info for `local` inline bytes and `external` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `local` exceeds [`MAX_LOCAL_DATA_BYTE_SIZE`], if `external`
    /// exceeds [`MAX_EXTERNAL_DATA_BYTE_SIZE`], or if external data is
    /// present and `local` exceeds [`MAX_LOCAL_DATA_WITH_EXTERNAL`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(local: usize, external: usize) -> Self {
        check_sizes(local, external);
        Self {
            local_byte_size: local as u8,
            reserved: 0,
            external_byte_size: external as u16,
        }
    }

    /// Decodes size info from the first 4 bytes of a record.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than [`SIZE_INFO_SIZE`].
    #[inline]
    #[must_use]
    pub fn read_from(bytes: &[u8]) -> Self {
        assert!(
            bytes.len() >= SIZE_INFO_SIZE,
            "record truncated: {} bytes, size info needs {SIZE_INFO_SIZE}",
            bytes.len()
        );
        bytemuck::pod_read_unaligned(&bytes[..SIZE_INFO_SIZE])
    }

    /// Inline payload bytes in use.
    #[inline]
    #[must_use]
    pub const fn local_byte_size(self) -> usize {
        self.local_byte_size as usize
    }

    /// External payload bytes.
    #[inline]
    #[must_use]
    pub const fn external_byte_size(self) -> usize {
        self.external_byte_size as usize
    }

    /// Whether the event carries an external payload.
    #[inline]
    #[must_use]
    pub const fn has_external_data(self) -> bool {
        self.external_byte_size > 0
    }

    /// Header plus inline bytes, i.e. the offset of the external payload.
    #[inline]
    #[must_use]
    pub const fn local_package_size(self) -> usize {
        HEADER_SIZE + self.local_byte_size()
    }

    /// Unpadded record size on the wire.
    #[inline]
    #[must_use]
    pub const fn package_size(self) -> usize {
        self.local_package_size() + self.external_byte_size()
    }

    /// Record size on the wire including padding.
    #[inline]
    #[must_use]
    pub const fn aligned_package_size(self) -> usize {
        align_up(self.package_size())
    }

    /// Grows the local size to cover `end`, never shrinking it.
    ///
    /// # Panics
    ///
    /// Panics if the result would violate the size invariants.
    pub(crate) fn grow_local_to(&mut self, end: usize) {
        if end > self.local_byte_size() {
            *self = Self::new(end, self.external_byte_size());
        }
    }

    /// Replaces the declared external size.
    ///
    /// # Panics
    ///
    /// Panics if the result would violate the size invariants.
    pub(crate) fn set_external_byte_size(&mut self, external: usize) {
        *self = Self::new(self.local_byte_size(), external);
    }

    /// Re-checks the invariants of a value read from foreign bytes.
    ///
    /// # Panics
    ///
    /// Panics if the size info is corrupt.
    #[inline]
    pub fn validate(self) {
        check_sizes(self.local_byte_size(), self.external_byte_size());
    }
}

fn check_sizes(local: usize, external: usize) {
    assert!(
        local <= MAX_LOCAL_DATA_BYTE_SIZE,
        "local data size {local} exceeds the {MAX_LOCAL_DATA_BYTE_SIZE}-byte inline limit"
    );
    assert!(
        external <= MAX_EXTERNAL_DATA_BYTE_SIZE,
        "external data size {external} exceeds the {MAX_EXTERNAL_DATA_BYTE_SIZE}-byte limit"
    );
    assert!(
        external == 0 || local <= MAX_LOCAL_DATA_WITH_EXTERNAL,
        "local data size {local} exceeds the {MAX_LOCAL_DATA_WITH_EXTERNAL}-byte inline limit \
         of events with external data"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_info_is_four_bytes() {
        assert_eq!(std::mem::size_of::<EventDataSize>(), SIZE_INFO_SIZE);
    }

    #[test]
    fn test_derived_sizes() {
        let size = EventDataSize::new(4, 8);
        assert_eq!(size.local_package_size(), 12);
        assert_eq!(size.package_size(), 20);
        assert_eq!(size.aligned_package_size(), 24);

        assert_eq!(EventDataSize::EMPTY.aligned_package_size(), HEADER_SIZE);
        assert_eq!(EventDataSize::new(24, 0).aligned_package_size(), 32);
        assert_eq!(EventDataSize::new(1, 0).aligned_package_size(), 16);
    }

    #[test]
    fn test_wire_layout() {
        let size = EventDataSize::new(3, 0x0102);
        let bytes = bytemuck::bytes_of(&size);
        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[1], 0);
        assert_eq!(u16::from_ne_bytes([bytes[2], bytes[3]]), 0x0102);
        assert_eq!(EventDataSize::read_from(bytes), size);
    }

    #[test]
    fn test_grow_local_never_shrinks() {
        let mut size = EventDataSize::new(8, 0);
        size.grow_local_to(4);
        assert_eq!(size.local_byte_size(), 8);
        size.grow_local_to(20);
        assert_eq!(size.local_byte_size(), 20);
    }

    #[test]
    #[should_panic(expected = "24-byte inline limit")]
    fn test_local_over_limit_panics() {
        let _ = EventDataSize::new(25, 0);
    }

    #[test]
    #[should_panic(expected = "65535-byte limit")]
    fn test_external_over_limit_panics() {
        let _ = EventDataSize::new(0, 65_536);
    }

    #[test]
    #[should_panic(expected = "events with external data")]
    fn test_local_over_pointer_budget_panics() {
        let _ = EventDataSize::new(17, 1);
    }
}
