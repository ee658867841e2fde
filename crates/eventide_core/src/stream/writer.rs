//! Typed serialization into a batch.

use bytemuck::Pod;

use crate::buffer::{BatchBuffer, ParallelWriter};
use crate::format::{EventDataSize, EventHeader, ALIGNMENT, HEADER_SIZE, SIZE_INFO_SIZE};

/// Producer view of a live [`super::EventStreamer`].
#[derive(Clone, Copy, Debug)]
pub struct EventWriter<'a> {
    inner: ParallelWriter<'a>,
}

impl<'a> EventWriter<'a> {
    pub(super) fn new(inner: ParallelWriter<'a>) -> Self {
        Self { inner }
    }

    /// Opens a new batch owned by the calling thread.
    #[must_use]
    pub fn begin_batch(&self) -> BatchWriter<'a> {
        BatchWriter {
            batch: self.inner.begin_batch(),
        }
    }
}

/// An open batch accepting serialized events.
///
/// Sealed on [`BatchWriter::end_batch`] or drop.
///
/// # Example
///
/// ```rust,ignore
/// let mut batch = stream.as_writer().begin_batch();
/// batch.write_event(1);                        // header only
/// batch.write_event_local(2, &42u32);          // inline payload
/// batch.write_event_ext(3, &[0u8; 256]);       // external payload
/// batch.write_event_with(7, &42u32, &99u64);   // both
/// batch.end_batch();
/// ```
#[derive(Debug)]
pub struct BatchWriter<'a> {
    batch: BatchBuffer<'a>,
}

impl BatchWriter<'_> {
    /// This batch's id.
    #[inline]
    #[must_use]
    pub const fn batch_id(&self) -> usize {
        self.batch.id()
    }

    /// Records written so far.
    #[inline]
    #[must_use]
    pub const fn record_count(&self) -> usize {
        self.batch.record_count()
    }

    /// Bytes written so far, padding included.
    #[inline]
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.batch.len()
    }

    /// Writes a header-only event (8 bytes on the wire).
    ///
    /// # Panics
    ///
    /// Panics if `type_id` is negative.
    pub fn write_event(&mut self, type_id: i32) {
        self.write_event_bytes(type_id, &[], &[]);
    }

    /// Writes an event whose payload is stored inline.
    ///
    /// # Panics
    ///
    /// Panics if `T` is larger than 24 bytes or `type_id` is negative.
    pub fn write_event_local<T: Pod>(&mut self, type_id: i32, local: &T) {
        self.write_event_bytes(type_id, bytemuck::bytes_of(local), &[]);
    }

    /// Writes an event whose payload is stored externally.
    ///
    /// # Panics
    ///
    /// Panics if `T` is larger than 65535 bytes or `type_id` is negative.
    pub fn write_event_ext<T: Pod>(&mut self, type_id: i32, external: &T) {
        self.write_event_bytes(type_id, &[], bytemuck::bytes_of(external));
    }

    /// Writes an event with both an inline and an external payload.
    ///
    /// # Panics
    ///
    /// Panics if `TL` is larger than 16 bytes, `TX` is larger than 65535
    /// bytes, or `type_id` is negative.
    pub fn write_event_with<TL: Pod, TX: Pod>(&mut self, type_id: i32, local: &TL, external: &TX) {
        self.write_event_bytes(type_id, bytemuck::bytes_of(local), bytemuck::bytes_of(external));
    }

    /// Writes an event from raw payload slices.
    ///
    /// # Panics
    ///
    /// Panics if either slice exceeds its limit (24 inline bytes, or 16 when
    /// `external` is non-empty; 65535 external bytes) or `type_id` is
    /// negative.
    pub fn write_event_bytes(&mut self, type_id: i32, local: &[u8], external: &[u8]) {
        assert!(type_id >= 0, "event type id {type_id} must not be negative");
        let size = EventDataSize::new(local.len(), external.len());
        let local_end = size.local_package_size();

        let record = self.batch.allocate_record(size.aligned_package_size());
        record[..SIZE_INFO_SIZE].copy_from_slice(bytemuck::bytes_of(&size));
        record[SIZE_INFO_SIZE..HEADER_SIZE].copy_from_slice(&type_id.to_ne_bytes());
        record[HEADER_SIZE..local_end].copy_from_slice(local);
        record[local_end..local_end + external.len()].copy_from_slice(external);
    }

    /// Writes `header` and reserves room for its declared external bytes.
    ///
    /// The whole aligned record is allocated up front; fill the external
    /// region through the returned writer. Bytes left unfilled stay zero.
    #[must_use]
    pub fn write_header(&mut self, header: &EventHeader) -> ExternalDataWriter<'_> {
        let size = header.size_info();
        let local_end = size.local_package_size();

        let record = self.batch.allocate_record(size.aligned_package_size());
        record[..local_end].copy_from_slice(header.wire_prefix());
        ExternalDataWriter {
            region: &mut record[local_end..size.package_size()],
            used: 0,
        }
    }

    /// Copies a finished, aligned record into the batch.
    pub(crate) fn write_raw_record(&mut self, record: &[u8]) {
        debug_assert!(record.len() % ALIGNMENT == 0);
        self.batch.allocate_record(record.len()).copy_from_slice(record);
    }

    /// Seals the batch.
    #[inline]
    pub fn end_batch(self) {
        self.batch.end();
    }
}

/// Sequential writer for the external region reserved by
/// [`BatchWriter::write_header`].
#[derive(Debug)]
pub struct ExternalDataWriter<'w> {
    region: &'w mut [u8],
    used: usize,
}

impl ExternalDataWriter<'_> {
    /// Declared external capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes written so far.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Bytes still available.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    /// Appends `value` after the bytes already written.
    ///
    /// # Panics
    ///
    /// Panics if the write would exceed the declared external size.
    pub fn write_external_data<T: Pod>(&mut self, value: &T) {
        self.write_external_bytes(bytemuck::bytes_of(value));
    }

    /// Appends `bytes` after the bytes already written.
    ///
    /// # Panics
    ///
    /// Panics if the write would exceed the declared external size.
    pub fn write_external_bytes(&mut self, bytes: &[u8]) {
        let end = self.used + bytes.len();
        assert!(
            end <= self.region.len(),
            "external write of {} bytes overruns the declared {} external bytes \
             ({} already written)",
            bytes.len(),
            self.region.len(),
            self.used
        );
        self.region[self.used..end].copy_from_slice(bytes);
        self.used = end;
    }
}
