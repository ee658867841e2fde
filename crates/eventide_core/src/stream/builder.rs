//! Stage-then-commit event builder.

use bytemuck::Pod;

use super::writer::BatchWriter;
use crate::format::{
    align_up, EventDataSize, HEADER_SIZE, MAX_LOCAL_DATA_BYTE_SIZE, MAX_LOCAL_DATA_WITH_EXTERNAL,
    SIZE_INFO_SIZE,
};

/// Builds one event at a time in a reusable scratch buffer, then commits it
/// to a batch in a single copy.
///
/// ## Local/External Split
///
/// ```text
///   add_data(u64)  add_data(u64)  add_data(u32)       write()
///   ├── local ───┼── local ─────┤├── external ──┤  →  size fields patched,
///   boundary: 8     boundary: 16   locked at 16       record padded to 8
/// ```
///
/// The boundary follows the payload while it is unlocked and every write
/// still fits in the 16 bytes left beside the external pointer. A write that
/// would cross that budget, or an explicit
/// [`EventWriterBuffer::start_external_data`], locks it. A locked boundary
/// is stored as its bitwise complement.
///
/// If the boundary was never locked explicitly and the whole payload fits
/// in the 24-byte inline area, [`EventWriterBuffer::write`] stores all of it
/// inline.
///
/// # Example
///
/// ```rust,ignore
/// let mut builder = EventWriterBuffer::new();
///
/// builder.begin(7);
/// builder.add_data(&42u32);
/// builder.start_external_data();
/// builder.add_bytes(name.as_bytes());
/// builder.write(&mut batch);
/// ```
#[derive(Debug, Default)]
pub struct EventWriterBuffer {
    /// Header placeholder followed by the staged payload.
    scratch: Vec<u8>,
    type_id: i32,
    /// Local/external boundary in payload bytes; negative (complemented)
    /// once locked.
    boundary: i32,
    explicit_external: bool,
    active: bool,
}

impl EventWriterBuffer {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts staging an event of `type_id`, discarding anything staged.
    ///
    /// # Panics
    ///
    /// Panics if `type_id` is negative.
    pub fn begin(&mut self, type_id: i32) {
        assert!(type_id >= 0, "event type id {type_id} must not be negative");
        self.scratch.clear();
        self.scratch.resize(HEADER_SIZE, 0);
        self.type_id = type_id;
        self.boundary = 0;
        self.explicit_external = false;
        self.active = true;
    }

    /// Appends `value` to the staged payload.
    ///
    /// # Panics
    ///
    /// Panics if no event was begun.
    pub fn add_data<T: Pod>(&mut self, value: &T) {
        self.add_bytes(bytemuck::bytes_of(value));
    }

    /// Appends `bytes` to the staged payload.
    ///
    /// # Panics
    ///
    /// Panics if no event was begun.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        assert!(self.active, "no event staged; call begin first");
        if !self.is_locked() {
            let end = self.payload_len() + bytes.len();
            if end <= MAX_LOCAL_DATA_WITH_EXTERNAL {
                self.boundary = end as i32;
            } else {
                self.boundary = !self.boundary;
            }
        }
        self.scratch.extend_from_slice(bytes);
    }

    /// Routes every following write to external data.
    ///
    /// # Panics
    ///
    /// Panics if no event was begun.
    pub fn start_external_data(&mut self) {
        assert!(self.active, "no event staged; call begin first");
        if !self.is_locked() {
            self.boundary = !self.boundary;
        }
        self.explicit_external = true;
    }

    /// Whether the local/external boundary is locked.
    #[inline]
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.boundary < 0
    }

    /// Staged payload bytes, local and external.
    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.scratch.len().saturating_sub(HEADER_SIZE)
    }

    /// Payload bytes currently assigned to local data.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn boundary(&self) -> usize {
        if self.is_locked() {
            (!self.boundary) as usize
        } else {
            self.boundary as usize
        }
    }

    /// Sizes the staged event would be committed with.
    ///
    /// # Panics
    ///
    /// Panics if the staged payload violates a size limit.
    #[must_use]
    pub fn size_info(&self) -> EventDataSize {
        let payload = self.payload_len();
        if !self.explicit_external && payload <= MAX_LOCAL_DATA_BYTE_SIZE {
            EventDataSize::new(payload, 0)
        } else {
            let local = self.boundary();
            EventDataSize::new(local, payload - local)
        }
    }

    /// Commits the staged event to `batch` and clears the builder.
    ///
    /// # Panics
    ///
    /// Panics if no event was begun or the staged payload violates a size
    /// limit (65535 external bytes).
    pub fn write(&mut self, batch: &mut BatchWriter<'_>) {
        assert!(self.active, "no event staged; call begin first");
        let size = self.size_info();
        self.scratch[..SIZE_INFO_SIZE].copy_from_slice(bytemuck::bytes_of(&size));
        self.scratch[SIZE_INFO_SIZE..HEADER_SIZE].copy_from_slice(&self.type_id.to_ne_bytes());
        self.scratch.resize(align_up(self.scratch.len()), 0);

        batch.write_raw_record(&self.scratch);
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::stream::EventStreamer;

    fn live_stream() -> EventStreamer {
        let mut stream = EventStreamer::new(&StreamConfig::default());
        stream.create();
        stream
    }

    #[test]
    fn test_boundary_follows_small_writes() {
        let mut builder = EventWriterBuffer::new();
        builder.begin(1);
        builder.add_data(&1u64);
        builder.add_data(&2u64);
        assert_eq!(builder.boundary(), 16);
        assert!(!builder.is_locked());

        builder.add_data(&3u32);
        assert!(builder.is_locked());
        assert_eq!(builder.boundary(), 16);
        // 20 bytes still fit inline.
        assert_eq!(builder.size_info(), EventDataSize::new(20, 0));

        builder.add_data(&4u64);
        assert_eq!(builder.size_info(), EventDataSize::new(16, 12));
    }

    #[test]
    fn test_explicit_external_is_kept() {
        let mut builder = EventWriterBuffer::new();
        builder.begin(1);
        builder.add_data(&1u32);
        builder.start_external_data();
        builder.add_data(&2u32);
        assert_eq!(builder.size_info(), EventDataSize::new(4, 4));
    }

    #[test]
    fn test_lock_at_zero_is_distinct() {
        let mut builder = EventWriterBuffer::new();
        builder.begin(1);
        builder.start_external_data();
        assert!(builder.is_locked());
        assert_eq!(builder.boundary(), 0);
        builder.add_bytes(&[9; 40]);
        assert_eq!(builder.size_info(), EventDataSize::new(0, 40));
    }

    #[test]
    fn test_write_commits_aligned_record() {
        let mut stream = live_stream();
        {
            let mut batch = stream.as_writer().begin_batch();
            let mut builder = EventWriterBuffer::new();

            builder.begin(7);
            builder.add_data(&42u32);
            builder.start_external_data();
            builder.add_data(&99u64);
            builder.write(&mut batch);

            builder.begin(8);
            builder.add_data(&[1u8; 3]);
            builder.write(&mut batch);

            assert_eq!(batch.byte_len(), 24 + 16);
        }

        let reader = stream.as_reader();
        let mut events = reader.begin_batch(0);
        let first = events.read_event();
        assert_eq!(first.type_id(), 7);
        assert_eq!(first.local_byte_size(), 4);
        assert_eq!(first.external_byte_size(), 8);
        assert_eq!(first.get_data_at::<u32>(0), 42);
        assert_eq!(first.get_data_at::<u64>(4), 99);

        let second = events.read_event();
        assert_eq!(second.type_id(), 8);
        assert_eq!(second.local_data(), &[1, 1, 1]);
        assert!(!events.has_remaining());
    }

    #[test]
    #[should_panic(expected = "exceeds the 65535-byte limit")]
    fn test_oversized_external_panics_on_write() {
        let stream = live_stream();
        let mut batch = stream.as_writer().begin_batch();
        let mut builder = EventWriterBuffer::new();
        builder.begin(1);
        builder.add_bytes(&vec![0; 65_536]);
        builder.write(&mut batch);
    }

    #[test]
    #[should_panic(expected = "call begin first")]
    fn test_add_without_begin_panics() {
        EventWriterBuffer::new().add_data(&1u8);
    }
}
