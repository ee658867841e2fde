//! # Collection Pipeline
//!
//! Drains a stream once per cycle into a stable array of decoded events.
//!
//! ## Pipeline
//!
//! ```text
//!   batch ids + counts ─> size array ─> decode (per batch, disjoint slots)
//!        ─> filter ─> sum external sizes ─> grow cache once
//!        ─> relocate (single-threaded) ─> publish ─> reset stream
//! ```
//!
//! Decode, filter and size-sum run on the rayon pool once the record count
//! reaches the configured threshold. Relocation always runs on the calling
//! thread: the cache is grown before the first copy, so no pointer handed
//! to an earlier event can be invalidated by a later one.
//!
//! ## Safety Note
//!
//! Between decode and relocation the collected events point into the
//! stream's batch buffers, which stay alive because the stream is borrowed
//! until the reset at the very end. Published events point into the cache
//! and are only reachable through views borrowing the collector.

#![allow(unsafe_code)]

use rayon::prelude::*;

use crate::config::StreamConfig;
use crate::error::StreamResult;
use crate::format::{EventMut, EventRef, GenericEvent};
use crate::memory::ExternalDataCache;
use crate::stream::{EventReader, EventStreamer};

/// Per-cycle counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Writer requests the cycle drained. Zero for an idle cycle.
    pub write_requests: u32,
    /// Batches holding at least one event.
    pub batches: usize,
    /// Events decoded.
    pub decoded: usize,
    /// Events surviving the filter.
    pub retained: usize,
    /// External bytes relocated into the cache.
    pub external_bytes: usize,
    /// Whether the cache had to grow this cycle.
    pub cache_grew: bool,
}

/// Owns the published events and the cache backing their external data.
///
/// # Example
///
/// ```rust,ignore
/// let mut stream = EventStreamer::new(&config);
/// let mut collector = EventCollector::new(&config);
/// stream.create();
///
/// loop {
///     run_producers(&stream);
///
///     collector.collect(&mut stream, |e| e.type_id() != NOISE)?;
///     for event in collector.events().iter() {
///         handle(event);
///     }
/// }
/// ```
#[derive(Debug)]
pub struct EventCollector {
    events: Vec<GenericEvent>,
    cache: ExternalDataCache,
    parallel_threshold: usize,
    /// Whether `events` holds a completed cycle.
    published: bool,
    cycles: u64,
}

impl EventCollector {
    /// Creates a collector with the configured cache size and threshold.
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            events: Vec::new(),
            cache: ExternalDataCache::new(config.initial_cache_capacity)
                .with_limit(config.max_cache_capacity),
            parallel_threshold: config.parallel_threshold.max(1),
            published: false,
            cycles: 0,
        }
    }

    /// Overrides the record count from which steps run in parallel.
    #[must_use]
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(1);
        self
    }

    /// Collects every event written since the last cycle and keeps those
    /// `filter` accepts.
    ///
    /// Previous results are cleared first. If no writer was requested since
    /// the last cycle, nothing else happens. Otherwise the stream is reset
    /// and its dirty counter cleared once the events are published.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamError::OutOfMemory`] if the cache cannot grow
    /// to hold the retained external data. The stream is left untouched and
    /// stays dirty, so the next call collects the same events.
    ///
    /// # Panics
    ///
    /// Panics if the stream is not live or a batch holds a corrupt record.
    pub fn collect<F>(&mut self, streamer: &mut EventStreamer, filter: F) -> StreamResult<CollectStats>
    where
        F: Fn(EventRef<'_>) -> bool + Sync,
    {
        self.events.clear();
        self.cache.reset();
        self.published = false;

        if !streamer.is_dirty() {
            return Ok(CollectStats::default());
        }
        let write_requests = streamer.write_requests();

        let reader = streamer.as_reader();
        let batches: Vec<(usize, usize)> = reader
            .batch_ids()
            .map(|id| (id, reader.record_count(id)))
            .collect();
        let decoded: usize = batches.iter().map(|&(_, count)| count).sum();
        let parallel = decoded >= self.parallel_threshold;

        self.decode(&reader, &batches, parallel);
        self.apply_filter(&filter, parallel);

        let external_bytes: usize = if parallel {
            self.events.par_iter().map(GenericEvent::external_byte_size).sum()
        } else {
            self.events.iter().map(GenericEvent::external_byte_size).sum()
        };

        let cache_grew = match self.cache.reserve(external_bytes) {
            Ok(grew) => grew,
            Err(err) => {
                self.events.clear();
                return Err(err);
            }
        };
        if cache_grew && self.cycles > 0 {
            tracing::warn!(
                capacity = self.cache.capacity(),
                "external data cache grew mid-run; consider a larger initial_cache_capacity"
            );
        }

        for event in &mut self.events {
            // SAFETY: the source batches are alive (the stream is not reset
            // until below) and the cache was reserved for the whole pass.
            unsafe { event.relocate_external_data_into(&mut self.cache) };
        }

        streamer.reset();
        streamer.clear_dirty();
        self.published = true;
        self.cycles += 1;

        let stats = CollectStats {
            write_requests,
            batches: batches.len(),
            decoded,
            retained: self.events.len(),
            external_bytes,
            cache_grew,
        };
        tracing::debug!(
            batches = stats.batches,
            decoded = stats.decoded,
            retained = stats.retained,
            external_bytes = stats.external_bytes,
            parallel,
            "events collected"
        );
        Ok(stats)
    }

    /// [`EventCollector::collect`] keeping every event.
    ///
    /// # Errors
    ///
    /// Same as [`EventCollector::collect`].
    pub fn collect_all(&mut self, streamer: &mut EventStreamer) -> StreamResult<CollectStats> {
        self.collect(streamer, |_| true)
    }

    /// Decodes every batch into its own slice of `events`.
    fn decode(&mut self, reader: &EventReader<'_>, batches: &[(usize, usize)], parallel: bool) {
        let total = batches.iter().map(|&(_, count)| count).sum();
        self.events.resize(total, GenericEvent::EMPTY);

        let mut slots = Vec::with_capacity(batches.len());
        let mut rest = self.events.as_mut_slice();
        for &(id, count) in batches {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(count);
            slots.push((id, head));
            rest = tail;
        }

        let decode_batch = |(id, slots): (usize, &mut [GenericEvent])| {
            let mut batch = reader.begin_batch(id);
            for slot in slots {
                *slot = batch.read_event().into_raw();
            }
        };
        if parallel {
            slots.into_par_iter().for_each(decode_batch);
        } else {
            slots.into_iter().for_each(decode_batch);
        }
    }

    fn apply_filter<F>(&mut self, filter: &F, parallel: bool)
    where
        F: Fn(EventRef<'_>) -> bool + Sync,
    {
        if parallel {
            let keep: Vec<bool> = self
                .events
                .par_iter()
                // SAFETY: the stream is borrowed for the whole collection.
                .map(|event| filter(unsafe { EventRef::from_raw(*event) }))
                .collect();
            let mut keep = keep.into_iter();
            self.events.retain(|_| keep.next().unwrap_or(false));
        } else {
            // SAFETY: the stream is borrowed for the whole collection.
            self.events.retain(|event| filter(unsafe { EventRef::from_raw(*event) }));
        }
    }

    /// Events published by the last cycle.
    #[must_use]
    pub fn events(&self) -> CollectedEvents<'_> {
        CollectedEvents {
            events: if self.published { &self.events[..] } else { &[] },
        }
    }

    /// Mutable access to the events published by the last cycle.
    #[must_use]
    pub fn events_mut(&mut self) -> CollectedEventsMut<'_> {
        CollectedEventsMut {
            events: if self.published { &mut self.events[..] } else { &mut [] },
        }
    }

    /// Number of published events.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events().len()
    }

    /// Whether the last cycle published nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The cache holding published external data.
    #[inline]
    #[must_use]
    pub const fn cache(&self) -> &ExternalDataCache {
        &self.cache
    }

    /// Completed collection cycles.
    #[inline]
    #[must_use]
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }
}

/// Shared view of published events.
#[derive(Clone, Copy, Debug)]
pub struct CollectedEvents<'a> {
    events: &'a [GenericEvent],
}

impl<'a> CollectedEvents<'a> {
    /// Number of events.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether there are no events.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Event at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<EventRef<'a>> {
        // SAFETY: published events point into the cache borrowed for 'a.
        self.events.get(index).map(|event| unsafe { EventRef::from_raw(*event) })
    }

    /// Events in collection order.
    pub fn iter(&self) -> impl Iterator<Item = EventRef<'a>> + 'a {
        let events: &'a [GenericEvent] = self.events;
        // SAFETY: published events point into the cache borrowed for 'a.
        events.iter().map(|event| unsafe { EventRef::from_raw(*event) })
    }

    /// The raw events. Their external pointers are valid until the next
    /// collection cycle.
    #[inline]
    #[must_use]
    pub const fn as_raw(&self) -> &'a [GenericEvent] {
        self.events
    }
}

/// Mutable view of published events.
#[derive(Debug)]
pub struct CollectedEventsMut<'a> {
    events: &'a mut [GenericEvent],
}

impl CollectedEventsMut<'_> {
    /// Number of events.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether there are no events.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Mutable event at `index`.
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<EventMut<'_>> {
        // SAFETY: each published event owns a disjoint cache range, and the
        // cache is exclusively borrowed through the collector.
        self.events.get_mut(index).map(|event| unsafe { EventMut::from_raw(event) })
    }

    /// Mutable events in collection order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = EventMut<'_>> + '_ {
        // SAFETY: as in `get_mut`.
        self.events.iter_mut().map(|event| unsafe { EventMut::from_raw(event) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::registry::EventTypeRegistry;

    fn setup(threshold: usize) -> (EventStreamer, EventCollector) {
        let config = StreamConfig {
            initial_cache_capacity: 16,
            ..StreamConfig::default()
        };
        let mut stream = EventStreamer::new(&config);
        stream.create();
        (stream, EventCollector::new(&config).with_parallel_threshold(threshold))
    }

    #[test]
    fn test_idle_cycle_does_no_work() {
        let (mut stream, mut collector) = setup(1024);
        stream.as_writer().begin_batch().write_event(1);
        collector.collect_all(&mut stream).unwrap();
        assert_eq!(collector.len(), 1);

        let stats = collector.collect_all(&mut stream).unwrap();
        assert_eq!(stats, CollectStats::default());
        assert!(collector.is_empty());
        assert_eq!(collector.cycles(), 1);
    }

    #[test]
    fn test_example_scenario() {
        let mut registry = EventTypeRegistry::new();
        registry
            .register_event_type(7)
            .register_next_data_type::<u32>()
            .register_next_data_type::<u64>();

        let (mut stream, mut collector) = setup(1024);
        {
            let writer = stream.as_writer();
            let batches: Vec<_> = (0..4).map(|_| writer.begin_batch()).collect();
            let mut batches = batches.into_iter();
            let mut batch = batches.nth(3).unwrap();
            assert_eq!(batch.batch_id(), 3);
            batch.write_event_with(7, &42u32, &99u64);
        }

        let stats = collector.collect_all(&mut stream).unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.external_bytes, 8);

        let event = collector.events().get(0).unwrap();
        assert_eq!(event.type_id(), 7);
        assert_eq!(event.local_byte_size(), 4);
        assert_eq!(event.external_byte_size(), 8);
        assert_eq!(event.get_data_at::<u32>(0), 42);
        assert_eq!(event.get_data_at::<u64>(4), 99);
        assert_eq!(event.get_field::<u32>(&registry, 0), 42);
        assert_eq!(event.get_field::<u64>(&registry, 1), 99);

        let ptr = event.into_raw().external_ptr().unwrap();
        assert!(collector.cache().contains(ptr));
    }

    #[test]
    fn test_relocated_data_outlives_stream_reset() {
        let (mut stream, mut collector) = setup(1024);
        {
            let mut batch = stream.as_writer().begin_batch();
            for i in 0..50u64 {
                batch.write_event_ext(1, &[i, i * 2]);
            }
        }
        collector.collect_all(&mut stream).unwrap();

        // Reuse the recycled batch buffers with different bytes.
        {
            let mut batch = stream.as_writer().begin_batch();
            for _ in 0..50 {
                batch.write_event_ext(1, &[u64::MAX, u64::MAX]);
            }
        }

        assert_eq!(collector.cache().used(), 50 * 16);
        for (i, event) in collector.events().iter().enumerate() {
            let i = i as u64;
            assert_eq!(event.get_data_at::<u64>(0), i);
            assert_eq!(event.get_data_at::<u64>(8), i * 2);
            assert!(collector.cache().contains(event.into_raw().external_ptr().unwrap()));
        }
    }

    #[test]
    fn test_filter_runs_before_relocation() {
        let (mut stream, mut collector) = setup(1024);
        {
            let mut batch = stream.as_writer().begin_batch();
            batch.write_event_ext(1, &[0u8; 64]);
            batch.write_event_ext(2, &[0u8; 32]);
            batch.write_event(3);
        }

        let stats = collector.collect(&mut stream, |e| e.type_id() != 1).unwrap();
        assert_eq!(stats.decoded, 3);
        assert_eq!(stats.retained, 2);
        assert_eq!(stats.external_bytes, 32);
        assert!(stats.cache_grew);
        assert_eq!(collector.cache().used(), 32);

        let types: Vec<i32> = collector.events().iter().map(|e| e.type_id()).collect();
        assert_eq!(types, vec![2, 3]);
    }

    #[test]
    fn test_failed_cache_growth_keeps_events_for_retry() {
        let config = StreamConfig {
            initial_cache_capacity: 16,
            max_cache_capacity: Some(32),
            ..StreamConfig::default()
        };
        let mut stream = EventStreamer::new(&config);
        let mut collector = EventCollector::new(&config);
        stream.create();
        {
            let mut batch = stream.as_writer().begin_batch();
            batch.write_event_ext(1, &[7u64; 4]);
            batch.write_event_ext(2, &[9u64; 4]);
        }

        let err = collector.collect_all(&mut stream).unwrap_err();
        assert_eq!(err, StreamError::OutOfMemory { requested: 64 });
        assert!(collector.is_empty());
        assert!(stream.is_dirty());
        assert_eq!(stream.as_reader().total_records(), 2);

        // Dropping the larger half fits the limit on retry.
        let stats = collector.collect(&mut stream, |e| e.type_id() == 2).unwrap();
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.retained, 1);
        assert_eq!(stats.external_bytes, 32);
        assert!(!stream.is_dirty());
        let event = collector.events().get(0).unwrap();
        assert_eq!(event.get_data_at::<u64>(24), 9);
    }

    #[test]
    #[should_panic(expected = "runs past 0 local + 16 external bytes")]
    fn test_wrapping_offset_write_panics() {
        let (mut stream, mut collector) = setup(1024);
        {
            let mut batch = stream.as_writer().begin_batch();
            batch.write_event_ext(1, &[0x1111_1111_1111_1111_u64; 2]);
            batch.write_event_ext(1, &[0x2222_2222_2222_2222_u64; 2]);
        }
        collector.collect_all(&mut stream).unwrap();

        let mut events = collector.events_mut();
        let mut second = events.get_mut(1).unwrap();
        second.set_data_at(usize::MAX - 7, &0xBAD_u64);
    }

    #[test]
    fn test_collect_clears_dirty_and_resets_stream() {
        let (mut stream, mut collector) = setup(1024);
        stream.as_writer().begin_batch().write_event(1);
        assert!(stream.is_dirty());

        collector.collect_all(&mut stream).unwrap();
        assert!(!stream.is_dirty());
        assert!(stream.is_created());
        assert_eq!(stream.as_reader().total_records(), 0);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        fn run(threshold: usize) -> Vec<(i32, u32, u64)> {
            let (mut stream, mut collector) = setup(threshold);
            std::thread::scope(|s| {
                for t in 0..4u32 {
                    let writer = stream.as_writer();
                    s.spawn(move || {
                        let mut batch = writer.begin_batch();
                        for i in 0..100u32 {
                            batch.write_event_with(5, &(t * 1000 + i), &u64::from(i));
                        }
                    });
                }
            });
            collector.collect(&mut stream, |e| e.get_data_at::<u32>(0) % 3 != 0).unwrap();
            let mut out: Vec<_> = collector
                .events()
                .iter()
                .map(|e| (e.type_id(), e.get_data_at::<u32>(0), e.get_data_at::<u64>(4)))
                .collect();
            out.sort_unstable();
            out
        }

        let expected = (0..4u32)
            .flat_map(|t| (0..100).map(move |i| t * 1000 + i))
            .filter(|v| v % 3 != 0)
            .count();
        let sequential = run(usize::MAX);
        let parallel = run(1);
        assert_eq!(sequential.len(), expected);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_events_mut_writes_through_to_cache() {
        let (mut stream, mut collector) = setup(1024);
        stream.as_writer().begin_batch().write_event_with(1, &1u32, &2u32);
        collector.collect_all(&mut stream).unwrap();

        {
            let mut events = collector.events_mut();
            let mut event = events.get_mut(0).unwrap();
            event.set_data_at(0, &10u32);
            event.set_data_at(4, &20u32);
        }

        let event = collector.events().get(0).unwrap();
        assert_eq!(event.get_data_at::<u32>(0), 10);
        assert_eq!(event.external_data(), &20u32.to_ne_bytes());
        assert_eq!(collector.cache().as_slice(), &20u32.to_ne_bytes());
    }
}
