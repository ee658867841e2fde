//! # Event Type Registry
//!
//! Per-type field layouts, keyed by small integer type ids.
//!
//! ## Layout
//!
//! ```text
//! table[id] = EventDataSegmentInfo (64 bytes)
//! ┌─────────┬────────────┬────────────┬──────────────────────────────┐
//! │ type_id │ data_count │ is_defined │ data_segment_ends[30]        │
//! │   u16   │     u8     │     u8     │ u16 prefix sums of field sizes│
//! └─────────┴────────────┴────────────┴──────────────────────────────┘
//! ```
//!
//! The table is indexed directly by type id and only ever grows, zero-filled.
//! Sparse ids therefore cost memory proportional to the highest id in use;
//! keep ids dense.

use bytemuck::{Pod, Zeroable};

/// Maximum number of fields a single event type can register.
pub const MAX_DATA_FIELDS: usize = 30;

/// Upper bound on the summed size of all fields of one type.
pub const MAX_TOTAL_DATA_SIZE: usize = u16::MAX as usize;

/// Size of one registry record.
pub const SEGMENT_INFO_SIZE: usize = 64;

/// Field layout of one event type.
///
/// `data_segment_ends[i]` is the byte offset one past field `i`, so field
/// `i` spans `[ends[i - 1], ends[i])` with an implicit `ends[-1] = 0`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct EventDataSegmentInfo {
    type_id: u16,
    data_count: u8,
    is_defined: u8,
    data_segment_ends: [u16; MAX_DATA_FIELDS],
}

const _: () = assert!(std::mem::size_of::<EventDataSegmentInfo>() == SEGMENT_INFO_SIZE);

impl EventDataSegmentInfo {
    /// The registered type id.
    #[inline]
    #[must_use]
    pub const fn type_id(&self) -> u16 {
        self.type_id
    }

    /// Number of registered fields.
    #[inline]
    #[must_use]
    pub const fn data_count(&self) -> usize {
        self.data_count as usize
    }

    /// Whether this slot has been registered.
    #[inline]
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        self.is_defined != 0
    }

    /// Summed size of all registered fields.
    #[inline]
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.get_unsafe_offset(self.data_count())
    }

    /// Appends a field of type `T` to the layout.
    ///
    /// # Panics
    ///
    /// Panics past [`MAX_DATA_FIELDS`] fields or when the summed size would
    /// exceed [`MAX_TOTAL_DATA_SIZE`].
    pub fn register_next_data_type<T: Pod>(&mut self) -> &mut Self {
        self.register_data_size(std::mem::size_of::<T>())
    }

    /// Appends a field of `size` bytes to the layout.
    ///
    /// # Panics
    ///
    /// Panics past [`MAX_DATA_FIELDS`] fields or when the summed size would
    /// exceed [`MAX_TOTAL_DATA_SIZE`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn register_data_size(&mut self, size: usize) -> &mut Self {
        let index = self.data_count();
        assert!(
            index < MAX_DATA_FIELDS,
            "event type {} already has {MAX_DATA_FIELDS} fields",
            self.type_id
        );
        let end = self.total_size() + size;
        assert!(
            end <= MAX_TOTAL_DATA_SIZE,
            "event type {} layout of {end} bytes exceeds {MAX_TOTAL_DATA_SIZE} bytes",
            self.type_id
        );
        self.data_segment_ends[index] = end as u16;
        self.data_count += 1;
        self
    }

    /// Byte offset of field `index`, checked against `size_of::<T>()`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or the registered field size is not
    /// `size_of::<T>()`.
    #[must_use]
    pub fn get_offset<T>(&self, index: usize) -> usize {
        assert!(
            index < self.data_count(),
            "field {index} out of range for event type {} with {} fields",
            self.type_id,
            self.data_count
        );
        let start = self.get_unsafe_offset(index);
        let len = usize::from(self.data_segment_ends[index]) - start;
        assert!(
            len == std::mem::size_of::<T>(),
            "field {index} of event type {} is {len} bytes, accessed as {} bytes",
            self.type_id,
            std::mem::size_of::<T>()
        );
        start
    }

    /// Byte offset where field `index` starts, without a type check.
    ///
    /// `index == data_count()` yields the total size.
    ///
    /// # Panics
    ///
    /// Panics if `index > data_count()`.
    #[must_use]
    pub fn get_unsafe_offset(&self, index: usize) -> usize {
        assert!(
            index <= self.data_count(),
            "field {index} out of range for event type {} with {} fields",
            self.type_id,
            self.data_count
        );
        if index == 0 {
            0
        } else {
            usize::from(self.data_segment_ends[index - 1])
        }
    }

    /// Size of field `index` in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn data_size(&self, index: usize) -> usize {
        assert!(
            index < self.data_count(),
            "field {index} out of range for event type {} with {} fields",
            self.type_id,
            self.data_count
        );
        usize::from(self.data_segment_ends[index]) - self.get_unsafe_offset(index)
    }
}

/// Table of event type layouts indexed by type id.
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = EventTypeRegistry::new();
/// registry
///     .register_event_type(7)
///     .register_next_data_type::<u32>()
///     .register_next_data_type::<u64>();
///
/// assert_eq!(registry.get_type_info(7).get_offset::<u64>(1), 4);
/// ```
#[derive(Clone, Debug, Default)]
pub struct EventTypeRegistry {
    table: Vec<EventDataSegmentInfo>,
}

impl EventTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self { table: Vec::new() }
    }

    /// Defines event type `id` and returns its layout for field registration.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already defined.
    pub fn register_event_type(&mut self, id: u16) -> &mut EventDataSegmentInfo {
        let index = usize::from(id);
        if index >= self.table.len() {
            self.table.resize(index + 1, EventDataSegmentInfo::zeroed());
        }
        let info = &mut self.table[index];
        assert!(!info.is_defined(), "event type {id} is already registered");
        info.type_id = id;
        info.is_defined = 1;
        info
    }

    /// Whether `id` has been registered.
    #[inline]
    #[must_use]
    pub fn is_defined(&self, id: u16) -> bool {
        self.try_get_type_info(id).is_some()
    }

    /// Layout of `id`, or `None` if it was never registered.
    #[must_use]
    pub fn try_get_type_info(&self, id: u16) -> Option<&EventDataSegmentInfo> {
        self.table
            .get(usize::from(id))
            .filter(|info| info.is_defined())
    }

    /// Layout of `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was never registered.
    #[must_use]
    pub fn get_type_info(&self, id: u16) -> &EventDataSegmentInfo {
        match self.try_get_type_info(id) {
            Some(info) => info,
            None => panic!("event type {id} is not registered"),
        }
    }

    /// Mutable layout of `id`, to append fields after registration.
    ///
    /// # Panics
    ///
    /// Panics if `id` was never registered.
    pub fn update_event_type(&mut self, id: u16) -> &mut EventDataSegmentInfo {
        match self.table.get_mut(usize::from(id)) {
            Some(info) if info.is_defined() => info,
            _ => panic!("event type {id} is not registered"),
        }
    }

    /// Layout for an event's `i32` type id.
    ///
    /// # Panics
    ///
    /// Panics if `type_id` is outside the registry's `u16` range or unregistered.
    #[must_use]
    pub fn layout_of(&self, type_id: i32) -> &EventDataSegmentInfo {
        match u16::try_from(type_id) {
            Ok(id) => self.get_type_info(id),
            Err(_) => panic!("event type {type_id} is outside the registry id range"),
        }
    }

    /// Number of registered types.
    #[must_use]
    pub fn defined_count(&self) -> usize {
        self.table.iter().filter(|info| info.is_defined()).count()
    }

    /// Number of table slots, i.e. highest registered id plus one.
    #[inline]
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.table.len()
    }

    /// The flat table: [`SEGMENT_INFO_SIZE`] bytes per slot, indexed by id.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.table)
    }

    /// Iterates over registered layouts in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EventDataSegmentInfo> {
        self.table.iter().filter(|info| info.is_defined())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offsets() {
        let mut registry = EventTypeRegistry::new();
        registry
            .register_event_type(1)
            .register_next_data_type::<u32>()
            .register_next_data_type::<u16>()
            .register_next_data_type::<u64>();

        let info = registry.get_type_info(1);
        assert_eq!(info.data_count(), 3);
        assert_eq!(info.get_offset::<u32>(0), 0);
        assert_eq!(info.get_offset::<u16>(1), 4);
        assert_eq!(info.get_offset::<u64>(2), 6);
        assert_eq!(info.get_unsafe_offset(3), 14);
        assert_eq!(info.total_size(), 14);
        assert_eq!(info.data_size(2), 8);
    }

    #[test]
    fn test_sparse_ids_zero_extend() {
        let mut registry = EventTypeRegistry::new();
        registry.register_event_type(10);
        assert_eq!(registry.slot_count(), 11);
        assert_eq!(registry.as_bytes().len(), 11 * SEGMENT_INFO_SIZE);
        assert!(!registry.is_defined(3));
        assert!(registry.is_defined(10));
        assert_eq!(registry.defined_count(), 1);

        // Lower ids can still be registered later.
        registry.register_event_type(3);
        assert_eq!(registry.slot_count(), 11);
        assert_eq!(registry.iter().map(EventDataSegmentInfo::type_id).collect::<Vec<_>>(), vec![3, 10]);
    }

    #[test]
    fn test_byte_table_layout() {
        let mut registry = EventTypeRegistry::new();
        registry.register_event_type(1).register_next_data_type::<u32>();
        let bytes = &registry.as_bytes()[SEGMENT_INFO_SIZE..];
        assert_eq!(u16::from_ne_bytes([bytes[0], bytes[1]]), 1);
        assert_eq!(bytes[2], 1); // data_count
        assert_eq!(bytes[3], 1); // is_defined
        assert_eq!(u16::from_ne_bytes([bytes[4], bytes[5]]), 4);
    }

    #[test]
    fn test_update_appends_fields() {
        let mut registry = EventTypeRegistry::new();
        registry.register_event_type(2).register_next_data_type::<u8>();
        registry.update_event_type(2).register_next_data_type::<u32>();
        assert_eq!(registry.get_type_info(2).get_offset::<u32>(1), 1);
    }

    #[test]
    fn test_thirty_fields_allowed() {
        let mut registry = EventTypeRegistry::new();
        let info = registry.register_event_type(0);
        for _ in 0..MAX_DATA_FIELDS {
            info.register_next_data_type::<u8>();
        }
        assert_eq!(info.data_count(), MAX_DATA_FIELDS);
    }

    #[test]
    #[should_panic(expected = "already has 30 fields")]
    fn test_thirty_first_field_panics() {
        let mut registry = EventTypeRegistry::new();
        let info = registry.register_event_type(0);
        for _ in 0..=MAX_DATA_FIELDS {
            info.register_next_data_type::<u8>();
        }
    }

    #[test]
    #[should_panic(expected = "exceeds 65535 bytes")]
    fn test_oversized_layout_panics() {
        let mut registry = EventTypeRegistry::new();
        registry
            .register_event_type(0)
            .register_data_size(40_000)
            .register_data_size(30_000);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_double_registration_panics() {
        let mut registry = EventTypeRegistry::new();
        registry.register_event_type(4);
        registry.register_event_type(4);
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn test_unknown_type_panics() {
        let registry = EventTypeRegistry::new();
        let _ = registry.get_type_info(9);
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn test_update_unknown_type_panics() {
        let mut registry = EventTypeRegistry::new();
        registry.register_event_type(9);
        registry.update_event_type(8);
    }

    #[test]
    #[should_panic(expected = "accessed as 8 bytes")]
    fn test_offset_type_mismatch_panics() {
        let mut registry = EventTypeRegistry::new();
        registry.register_event_type(1).register_next_data_type::<u32>();
        let _ = registry.get_type_info(1).get_offset::<u64>(0);
    }
}
