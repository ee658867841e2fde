//! Consumer side of the parallel buffer.

use super::SealedBatch;
use crate::format::{EventDataSize, SIZE_INFO_SIZE};

/// Read-only view over every sealed batch.
#[derive(Clone, Copy, Debug)]
pub struct ParallelReader<'a> {
    batches: &'a [Option<SealedBatch>],
}

impl<'a> ParallelReader<'a> {
    pub(super) fn new(batches: &'a [Option<SealedBatch>]) -> Self {
        Self { batches }
    }

    fn batch(&self, id: usize) -> Option<&'a SealedBatch> {
        self.batches.get(id).and_then(Option::as_ref)
    }

    /// Ids of batches that hold at least one record, in id order.
    pub fn batch_ids(&self) -> impl Iterator<Item = usize> + 'a {
        self.batches
            .iter()
            .enumerate()
            .filter(|(_, batch)| batch.as_ref().is_some_and(|b| !b.bytes.is_empty()))
            .map(|(id, _)| id)
    }

    /// Number of batches that hold at least one record.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batch_ids().count()
    }

    /// Number of batch ids handed out, including empty batches.
    #[inline]
    #[must_use]
    pub fn assigned_batches(&self) -> usize {
        self.batches.len()
    }

    /// Records in batch `id`. Zero for unknown or empty batches.
    #[must_use]
    pub fn record_count(&self, id: usize) -> usize {
        self.batch(id).map_or(0, |b| b.records)
    }

    /// Bytes in batch `id`. Zero for unknown or empty batches.
    #[must_use]
    pub fn byte_len(&self, id: usize) -> usize {
        self.batch(id).map_or(0, |b| b.bytes.len())
    }

    /// Records across all batches.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.batches.iter().flatten().map(|b| b.records).sum()
    }

    /// Starts reading batch `id` from its first record.
    ///
    /// # Panics
    ///
    /// Panics if `id` was never handed out by a writer.
    #[must_use]
    pub fn begin_batch(&self, id: usize) -> BatchCursor<'a> {
        assert!(
            id < self.batches.len(),
            "batch {id} was never assigned ({} batches exist)",
            self.batches.len()
        );
        let (bytes, records) = self
            .batch(id)
            .map_or((&[][..], 0), |b| (b.bytes.as_slice(), b.records));
        BatchCursor {
            bytes,
            offset: 0,
            records_left: records,
        }
    }
}

/// Sequential cursor over the records of one batch.
#[derive(Clone, Debug)]
pub struct BatchCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
    records_left: usize,
}

impl<'a> BatchCursor<'a> {
    /// Whether another record follows.
    #[inline]
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.offset < self.bytes.len()
    }

    /// Records not yet read.
    #[inline]
    #[must_use]
    pub const fn remaining_records(&self) -> usize {
        self.records_left
    }

    /// Byte offset of the next record within the batch.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.offset
    }

    /// Size info of the next record, without advancing.
    ///
    /// # Panics
    ///
    /// Panics if the batch is exhausted.
    #[must_use]
    pub fn peek_size_info(&self) -> EventDataSize {
        assert!(self.has_remaining(), "batch exhausted");
        EventDataSize::read_from(&self.bytes[self.offset..self.offset + SIZE_INFO_SIZE])
    }

    /// Returns the next whole record (padding included) and advances past it.
    ///
    /// # Panics
    ///
    /// Panics if the batch is exhausted or the record runs past its end.
    pub fn next_record(&mut self) -> &'a [u8] {
        let size = self.peek_size_info().aligned_package_size();
        let end = self.offset + size;
        assert!(
            end <= self.bytes.len(),
            "corrupt batch: record at {} needs {size} bytes, {} remain",
            self.offset,
            self.bytes.len() - self.offset
        );
        let record = &self.bytes[self.offset..end];
        self.offset = end;
        self.records_left = self.records_left.saturating_sub(1);
        record
    }
}
