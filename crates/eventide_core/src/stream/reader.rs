//! Decoding events back out of sealed batches.

use crate::buffer::{BatchCursor, ParallelReader};
use crate::format::{EventDataSize, EventRef};

/// Consumer view of a live [`super::EventStreamer`].
#[derive(Clone, Copy, Debug)]
pub struct EventReader<'a> {
    inner: ParallelReader<'a>,
}

impl<'a> EventReader<'a> {
    pub(super) fn new(inner: ParallelReader<'a>) -> Self {
        Self { inner }
    }

    /// Ids of batches holding at least one event, in id order.
    pub fn batch_ids(&self) -> impl Iterator<Item = usize> + 'a {
        self.inner.batch_ids()
    }

    /// Number of batches holding at least one event.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.inner.batch_count()
    }

    /// Events in batch `id`.
    #[must_use]
    pub fn record_count(&self, id: usize) -> usize {
        self.inner.record_count(id)
    }

    /// Events across all batches.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.inner.total_records()
    }

    /// Starts decoding batch `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was never handed out by a writer.
    #[must_use]
    pub fn begin_batch(&self, id: usize) -> BatchReader<'a> {
        BatchReader {
            cursor: self.inner.begin_batch(id),
        }
    }
}

/// Sequential decoder over one batch.
///
/// Yields [`EventRef`]s whose external data still points into the batch;
/// the borrow keeps the stream alive for as long as they are used.
#[derive(Clone, Debug)]
pub struct BatchReader<'a> {
    cursor: BatchCursor<'a>,
}

impl<'a> BatchReader<'a> {
    /// Whether another event follows.
    #[inline]
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.cursor.has_remaining()
    }

    /// Events not yet read.
    #[inline]
    #[must_use]
    pub const fn remaining_events(&self) -> usize {
        self.cursor.remaining_records()
    }

    /// Size info of the next event, without advancing.
    ///
    /// # Panics
    ///
    /// Panics if the batch is exhausted.
    #[must_use]
    pub fn peek_size_info(&self) -> EventDataSize {
        self.cursor.peek_size_info()
    }

    /// Decodes the next event and advances past its aligned record.
    ///
    /// External bytes are not copied.
    ///
    /// # Panics
    ///
    /// Panics if the batch is exhausted or the record is corrupt.
    pub fn read_event(&mut self) -> EventRef<'a> {
        EventRef::decode(self.cursor.next_record())
    }
}

impl<'a> Iterator for BatchReader<'a> {
    type Item = EventRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.has_remaining().then(|| self.read_event())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining_events();
        (n, Some(n))
    }
}

impl ExactSizeIterator for BatchReader<'_> {}

#[cfg(test)]
mod tests {
    use crate::config::StreamConfig;
    use crate::stream::EventStreamer;

    #[test]
    fn test_iterate_batches_in_write_order() {
        let mut stream = EventStreamer::new(&StreamConfig::default());
        stream.create();
        {
            let writer = stream.as_writer();
            let mut a = writer.begin_batch();
            let mut b = writer.begin_batch();
            for i in 0..10u32 {
                a.write_event_local(1, &i);
                b.write_event_ext(2, &(i * 100));
            }
        }

        let reader = stream.as_reader();
        assert_eq!(reader.batch_count(), 2);
        assert_eq!(reader.total_records(), 20);

        let a: Vec<u32> = reader.begin_batch(0).map(|e| e.get_data_at(0)).collect();
        assert_eq!(a, (0..10).collect::<Vec<_>>());

        let batch = reader.begin_batch(1);
        assert_eq!(batch.len(), 10);
        for (i, event) in batch.enumerate() {
            assert_eq!(event.type_id(), 2);
            assert_eq!(event.local_byte_size(), 0);
            assert_eq!(event.external_data(), &(i as u32 * 100).to_ne_bytes());
        }
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut stream = EventStreamer::new(&StreamConfig::default());
        stream.create();
        stream.as_writer().begin_batch().write_event_local(4, &1u16);

        let reader = stream.as_reader();
        let mut batch = reader.begin_batch(0);
        assert_eq!(batch.peek_size_info().local_byte_size(), 2);
        assert_eq!(batch.peek_size_info().aligned_package_size(), 16);
        assert_eq!(batch.read_event().type_id(), 4);
        assert!(batch.next().is_none());
    }

    #[test]
    #[should_panic(expected = "batch exhausted")]
    fn test_read_past_end_panics() {
        let mut stream = EventStreamer::new(&StreamConfig::default());
        stream.create();
        stream.as_writer().begin_batch().end_batch();
        let reader = stream.as_reader();
        let _ = reader.begin_batch(0).read_event();
    }
}
