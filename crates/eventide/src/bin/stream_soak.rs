//! # Stream Soak Test
//!
//! Hammers a frame stream with concurrent producers and verifies that every
//! frame publishes exactly the events that were written.
//!
//! ## Usage
//!
//! ```bash
//! stream_soak --producers 8 --frames 600 --events 2000 --config stream.toml
//! ```

use eventide::core::{StreamConfig, MAX_LOCAL_DATA_BYTE_SIZE, MAX_LOCAL_DATA_WITH_EXTERNAL};
use eventide::{FrameStream, FrameStreamConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::time::Instant;

/// Event types with an even id survive the filter.
const TYPE_COUNT: i32 = 16;

/// What one producer wrote during a frame.
#[derive(Clone, Copy, Debug, Default)]
struct Produced {
    events: usize,
    retained: usize,
    external_bytes: usize,
    checksum: u64,
}

impl Produced {
    fn merge(mut self, other: Self) -> Self {
        self.events += other.events;
        self.retained += other.retained;
        self.external_bytes += other.external_bytes;
        self.checksum = self.checksum.wrapping_add(other.checksum);
        self
    }
}

fn checksum(bytes: &[u8]) -> u64 {
    bytes.iter().map(|&b| u64::from(b)).sum()
}

fn produce(frames: &FrameStream, seed: u64, events: usize) -> Produced {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut produced = Produced::default();
    let mut local = [0u8; MAX_LOCAL_DATA_BYTE_SIZE];
    let mut external = vec![0u8; 512];

    let mut batch = frames.writer().begin_batch();
    for _ in 0..events {
        let type_id = rng.gen_range(0..TYPE_COUNT);
        let external_len = if rng.gen_bool(0.3) { rng.gen_range(1..=external.len()) } else { 0 };
        let local_max = if external_len > 0 {
            MAX_LOCAL_DATA_WITH_EXTERNAL
        } else {
            MAX_LOCAL_DATA_BYTE_SIZE
        };
        let local_len = rng.gen_range(0..=local_max);
        rng.fill(&mut local[..local_len]);
        rng.fill(&mut external[..external_len]);

        batch.write_event_bytes(type_id, &local[..local_len], &external[..external_len]);

        produced.events += 1;
        if type_id % 2 == 0 {
            produced.retained += 1;
            produced.external_bytes += external_len;
            produced.checksum = produced
                .checksum
                .wrapping_add(checksum(&local[..local_len]))
                .wrapping_add(checksum(&external[..external_len]));
        }
    }
    batch.end_batch();
    produced
}

/// Message carried by a producer's panic payload.
fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         EVENTIDE STREAM SOAK                                     ║");
    println!("║         MANY PRODUCERS, ONE CONSUMER                             ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    // Parse command line arguments (simple parsing, no external deps)
    let args: Vec<String> = std::env::args().collect();
    let mut producers = 8usize;
    let mut frame_total = 600u64;
    let mut events_per_producer = 2_000usize;
    let mut seed = 0x5EED_u64;
    let mut config_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--producers" | "-p" => {
                if i + 1 < args.len() {
                    producers = args[i + 1].parse().unwrap_or(8);
                    i += 1;
                }
            }
            "--frames" | "-f" => {
                if i + 1 < args.len() {
                    frame_total = args[i + 1].parse().unwrap_or(600);
                    i += 1;
                }
            }
            "--events" | "-e" => {
                if i + 1 < args.len() {
                    events_per_producer = args[i + 1].parse().unwrap_or(2_000);
                    i += 1;
                }
            }
            "--seed" | "-s" => {
                if i + 1 < args.len() {
                    seed = args[i + 1].parse().unwrap_or(0x5EED);
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: stream_soak [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --producers <NUM>      Producer threads per frame (default: 8)");
                println!("  -f, --frames <NUM>         Frames to run (default: 600)");
                println!("  -e, --events <NUM>         Events per producer per frame (default: 2000)");
                println!("  -s, --seed <SEED>          Workload seed (default: 24301)");
                println!("  -c, --config <FILE>        Stream configuration (TOML)");
                println!("  -h, --help                 Show this help");
                return;
            }
            _ => {}
        }
        i += 1;
    }

    let stream = match &config_path {
        Some(path) => match StreamConfig::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("❌ {err}");
                std::process::exit(2);
            }
        },
        None => StreamConfig::production(),
    };

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Producers:          {producers}");
    println!("│ Frames:             {frame_total}");
    println!("│ Events/Producer:    {events_per_producer}");
    println!("│ Seed:               {seed}");
    println!("│ Config:             {}", config_path.as_deref().unwrap_or("production"));
    println!("│ Batch Capacity:     {} bytes", stream.initial_batch_capacity);
    println!("│ Cache Capacity:     {} bytes", stream.initial_cache_capacity);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let mut frames = FrameStream::new(FrameStreamConfig {
        stream,
        enable_timing_logs: true,
    });

    let start = Instant::now();
    let mut failures = 0u64;

    for frame in 0..frame_total {
        let shared = &frames;
        let mut panicked = 0u64;
        let expected = std::thread::scope(|s| {
            let handles: Vec<_> = (0..producers as u64)
                .map(|p| {
                    let producer_seed = seed ^ (frame << 16) ^ p;
                    s.spawn(move || produce(shared, producer_seed, events_per_producer))
                })
                .collect();
            let mut expected = Produced::default();
            for (p, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(produced) => expected = expected.merge(produced),
                    Err(payload) => {
                        let reason = panic_reason(payload.as_ref());
                        eprintln!("❌ frame {frame}: producer {p} panicked: {reason}");
                        panicked += 1;
                    }
                }
            }
            expected
        });
        if panicked > 0 {
            failures += 1;
            // Discard what the surviving producers wrote.
            let _ = frames.end_frame(|_| false);
            continue;
        }

        let stats = match frames.end_frame(|e| e.type_id() % 2 == 0) {
            Ok(stats) => stats,
            Err(err) => {
                eprintln!("❌ frame {frame}: {err}");
                failures += 1;
                continue;
            }
        };

        let published = frames
            .events()
            .iter()
            .fold(0u64, |sum, e| {
                sum.wrapping_add(checksum(e.local_data()))
                    .wrapping_add(checksum(e.external_data()))
            });

        let ok = stats.collect.decoded == expected.events
            && stats.collect.retained == expected.retained
            && stats.collect.external_bytes == expected.external_bytes
            && published == expected.checksum;
        if !ok {
            failures += 1;
            eprintln!(
                "❌ frame {frame}: decoded {}/{} retained {}/{} external {}/{}",
                stats.collect.decoded,
                expected.events,
                stats.collect.retained,
                expected.retained,
                stats.collect.external_bytes,
                expected.external_bytes
            );
        }
    }

    let elapsed = start.elapsed();
    println!();
    frames.stats().print_summary();
    println!();

    let pool = frames.stream().pool().stats();
    println!("┌─ BUFFER POOL ───────────────────────────────────────────────────┐");
    println!("│ Allocated:          {}", pool.allocated);
    println!("│ Reused:             {}", pool.reused);
    println!("│ Discarded:          {}", pool.discarded);
    println!("│ Pooled:             {}", pool.pooled);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();
    println!("Elapsed: {:.2}s", elapsed.as_secs_f64());

    if failures > 0 {
        println!("❌ {failures} of {frame_total} frames failed verification");
        std::process::exit(1);
    }
    println!("✅ All {frame_total} frames verified");
}
