//! # Frame-Driven Event Stream
//!
//! ```text
//! Frame N:
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. PRODUCE (any number of threads, &FrameStream)                    │
//! │    └─ writer().begin_batch() → write events → end_batch()           │
//! │                                                                     │
//! │ 2. END FRAME (&mut FrameStream, after producers joined)             │
//! │    ├─ Decode every batch, filter, relocate external data            │
//! │    ├─ Reset the stream for frame N + 1                              │
//! │    └─ Record frame statistics                                       │
//! │                                                                     │
//! │ 3. CONSUME (single thread)                                          │
//! │    └─ events() → stable until the next end_frame()                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use eventide_core::{
    CollectStats, CollectedEvents, CollectedEventsMut, EventCollector, EventDataSegmentInfo,
    EventRef, EventStreamer, EventTypeRegistry, EventWriter, StreamConfig, StreamResult,
};
use parking_lot::RwLock;

/// Target frame time for 60 FPS.
pub const TARGET_FRAME_TIME: Duration = Duration::from_micros(16_666);

/// Collection time above which a frame is logged as slow.
pub const MAX_COLLECT_TIME: Duration = Duration::from_millis(2);

/// Configuration for a frame stream.
#[derive(Clone, Debug, Default)]
pub struct FrameStreamConfig {
    /// Stream, pool and cache sizing.
    pub stream: StreamConfig,
    /// Log frames whose collection exceeds [`MAX_COLLECT_TIME`].
    pub enable_timing_logs: bool,
}

/// Statistics of one frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    /// Time since the previous frame ended, in microseconds.
    pub total_us: u64,
    /// Collection time in microseconds.
    pub collect_us: u64,
    /// Frame number.
    pub frame: u64,
    /// Collection counters.
    pub collect: CollectStats,
}

/// One event stream, collected once per frame.
///
/// Producers share `&FrameStream`; [`FrameStream::end_frame`] takes
/// `&mut self`, so it cannot start while a producer still holds a writer.
///
/// # Example
///
/// ```rust,ignore
/// let mut frames = FrameStream::new(FrameStreamConfig::default());
/// frames.register_event_type(7, |info| {
///     info.register_next_data_type::<u32>().register_next_data_type::<u64>();
/// });
///
/// loop {
///     std::thread::scope(|s| {
///         for _ in 0..4 {
///             let writer = frames.writer();
///             s.spawn(move || writer.begin_batch().write_event_with(7, &1u32, &2u64));
///         }
///     });
///
///     frames.end_frame(|_| true)?;
///     for event in frames.events().iter() {
///         // ...
///     }
/// }
/// ```
#[derive(Debug)]
pub struct FrameStream {
    /// The transient stream producers write into.
    stream: EventStreamer,
    /// Owns the published events.
    collector: EventCollector,
    /// Field layouts, shared with whoever decodes fields.
    registry: Arc<RwLock<EventTypeRegistry>>,
    /// Configuration.
    config: FrameStreamConfig,
    /// Frame counter.
    frame_count: u64,
    /// Last frame end time.
    last_frame_time: Instant,
    /// Accumulated frame statistics.
    stats_accumulator: FrameStatsAccumulator,
}

impl FrameStream {
    /// Creates a frame stream with a live stream and an empty registry.
    #[must_use]
    pub fn new(config: FrameStreamConfig) -> Self {
        let mut stream = EventStreamer::new(&config.stream);
        stream.create();
        let collector = EventCollector::new(&config.stream);

        Self {
            stream,
            collector,
            registry: Arc::new(RwLock::new(EventTypeRegistry::new())),
            config,
            frame_count: 0,
            last_frame_time: Instant::now(),
            stats_accumulator: FrameStatsAccumulator::new(),
        }
    }

    /// Writer for the current frame. Copy it into each producer thread.
    #[must_use]
    pub fn writer(&self) -> EventWriter<'_> {
        self.stream.as_writer()
    }

    /// Registers event type `id` and lets `fields` describe its layout.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered or the layout breaks a field limit.
    pub fn register_event_type(&self, id: u16, fields: impl FnOnce(&mut EventDataSegmentInfo)) {
        let mut registry = self.registry.write();
        fields(registry.register_event_type(id));
    }

    /// Shared handle to the type registry.
    #[must_use]
    pub fn registry(&self) -> Arc<RwLock<EventTypeRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Collects the frame's events and prepares the stream for the next frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the external data cache cannot grow. The frame's
    /// events stay in the stream and are retried at the next call.
    pub fn end_frame<F>(&mut self, filter: F) -> StreamResult<FrameStats>
    where
        F: Fn(EventRef<'_>) -> bool + Sync,
    {
        let collect_start = Instant::now();
        let collect = self.collector.collect(&mut self.stream, filter)?;
        let collect_time = collect_start.elapsed();

        let now = Instant::now();
        let total = now.duration_since(self.last_frame_time);
        self.last_frame_time = now;

        let stats = FrameStats {
            total_us: duration_us(total),
            collect_us: duration_us(collect_time),
            frame: self.frame_count,
            collect,
        };
        self.frame_count += 1;
        self.stats_accumulator.record(stats);

        // Log slow collections
        if self.config.enable_timing_logs && collect_time > MAX_COLLECT_TIME {
            tracing::warn!(
                frame = stats.frame,
                collect_ms = collect_time.as_secs_f64() * 1000.0,
                events = collect.decoded,
                "frame collection exceeded budget"
            );
        }
        Ok(stats)
    }

    /// Events published by the last frame.
    #[must_use]
    pub fn events(&self) -> CollectedEvents<'_> {
        self.collector.events()
    }

    /// Mutable access to the events published by the last frame.
    #[must_use]
    pub fn events_mut(&mut self) -> CollectedEventsMut<'_> {
        self.collector.events_mut()
    }

    /// Returns the current frame count.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Returns the accumulated statistics.
    #[must_use]
    pub fn stats(&self) -> &FrameStatsAccumulator {
        &self.stats_accumulator
    }

    /// The underlying stream, e.g. for pool statistics.
    #[must_use]
    pub fn stream(&self) -> &EventStreamer {
        &self.stream
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_us(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

/// Accumulator for frame statistics.
#[derive(Clone, Debug)]
pub struct FrameStatsAccumulator {
    /// Total frames recorded.
    pub frames_recorded: u64,
    /// Frames with no writer requests.
    pub idle_frames: u64,
    /// Sum of total frame times.
    pub total_us_sum: u64,
    /// Sum of collection times.
    pub collect_us_sum: u64,
    /// Min collection time.
    pub min_collect_us: u64,
    /// Max collection time.
    pub max_collect_us: u64,
    /// Events decoded across all frames.
    pub events_decoded: u64,
    /// Events retained across all frames.
    pub events_retained: u64,
    /// External bytes relocated across all frames.
    pub external_bytes: u64,
    /// Frames that grew the external data cache.
    pub cache_growths: u64,
    /// Frames that exceeded budget.
    pub frames_over_budget: u64,
}

impl FrameStatsAccumulator {
    /// Creates a new accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames_recorded: 0,
            idle_frames: 0,
            total_us_sum: 0,
            collect_us_sum: 0,
            min_collect_us: u64::MAX,
            max_collect_us: 0,
            events_decoded: 0,
            events_retained: 0,
            external_bytes: 0,
            cache_growths: 0,
            frames_over_budget: 0,
        }
    }

    /// Records a frame's statistics.
    pub fn record(&mut self, stats: FrameStats) {
        self.frames_recorded += 1;
        self.total_us_sum += stats.total_us;
        self.collect_us_sum += stats.collect_us;
        self.min_collect_us = self.min_collect_us.min(stats.collect_us);
        self.max_collect_us = self.max_collect_us.max(stats.collect_us);
        self.events_decoded += stats.collect.decoded as u64;
        self.events_retained += stats.collect.retained as u64;
        self.external_bytes += stats.collect.external_bytes as u64;

        if stats.collect.write_requests == 0 {
            self.idle_frames += 1;
        }
        if stats.collect.cache_grew {
            self.cache_growths += 1;
        }
        if stats.total_us > duration_us(TARGET_FRAME_TIME) {
            self.frames_over_budget += 1;
        }
    }

    /// Returns average collection time in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_collect_ms(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        (self.collect_us_sum as f64 / self.frames_recorded as f64) / 1000.0
    }

    /// Returns average events decoded per frame.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_events_per_frame(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        self.events_decoded as f64 / self.frames_recorded as f64
    }

    /// Returns the fraction of events dropped by the filter.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn filtered_ratio(&self) -> f64 {
        if self.events_decoded == 0 {
            return 0.0;
        }
        (self.events_decoded - self.events_retained) as f64 / self.events_decoded as f64
    }

    /// Returns the percentage of frames over budget.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn over_budget_ratio(&self) -> f64 {
        if self.frames_recorded == 0 {
            return 0.0;
        }
        self.frames_over_budget as f64 / self.frames_recorded as f64
    }

    /// Prints a summary of the statistics.
    #[allow(clippy::cast_precision_loss)]
    pub fn print_summary(&self) {
        let min_collect = if self.frames_recorded == 0 { 0 } else { self.min_collect_us };
        println!("╔══════════════════════════════════════════════════════════════════╗");
        println!("║                    FRAME STATISTICS SUMMARY                      ║");
        println!("╚══════════════════════════════════════════════════════════════════╝");
        println!();
        println!("┌─ COLLECTION ───────────────────────────────────────────────────┐");
        println!("│ Frames Recorded:    {} ({} idle)", self.frames_recorded, self.idle_frames);
        println!("│ Average Collect:    {:.3} ms", self.avg_collect_ms());
        println!("│ Min Collect:        {:.3} ms", min_collect as f64 / 1000.0);
        println!("│ Max Collect:        {:.3} ms", self.max_collect_us as f64 / 1000.0);
        println!("└──────────────────────────────────────────────────────────────────┘");
        println!();
        println!("┌─ EVENTS ───────────────────────────────────────────────────────┐");
        println!("│ Decoded:            {}", self.events_decoded);
        println!("│ Per Frame:          {:.1}", self.avg_events_per_frame());
        println!("│ Filtered Out:       {:.1}%", self.filtered_ratio() * 100.0);
        println!("│ External Bytes:     {}", self.external_bytes);
        println!("│ Cache Growths:      {}", self.cache_growths);
        println!("└──────────────────────────────────────────────────────────────────┘");
        println!();
        println!("┌─ BUDGET ───────────────────────────────────────────────────────┐");
        println!("│ Target:             {:.3} ms (60 FPS)", TARGET_FRAME_TIME.as_secs_f64() * 1000.0);
        println!(
            "│ Over Budget:        {} frames ({:.1}%)",
            self.frames_over_budget,
            self.over_budget_ratio() * 100.0
        );
        println!("└──────────────────────────────────────────────────────────────────┘");
    }
}

impl Default for FrameStatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
