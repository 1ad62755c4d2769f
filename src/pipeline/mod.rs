//! Chunk pipeline strategies.
//!
//! Both strategies consume the same ordered chunk list and deliver audio to
//! the sink in strict index order; they differ only in whether synthesis
//! and encoding overlap. Checkpoint persistence is sequential-only: chunk
//! completion needs a single-writer view that overlapped stages would
//! violate.

pub mod overlap;
pub mod sequential;

pub use overlap::run_overlap;
pub use sequential::run_sequential;

use crate::defaults;
use crate::error::Result;
use crate::events::{Event, EventEmitter};
use crate::export::{Mp3Stream, PcmSpool};
use std::time::{Duration, Instant};

/// Destination for synthesized chunk audio.
pub trait ChunkSink {
    fn write_samples(&mut self, samples: &[i16]) -> Result<()>;
}

impl ChunkSink for Mp3Stream {
    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        Mp3Stream::write_samples(self, samples)
    }
}

impl ChunkSink for PcmSpool {
    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        PcmSpool::write_samples(self, samples)
    }
}

/// What a pipeline run produced, for chapter timing and reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRunResult {
    /// Cumulative sample offset at which each chunk starts.
    pub chunk_sample_offsets: Vec<u64>,
    pub total_samples: u64,
    /// Per-chunk synthesis wall time; reused chunks record zero.
    pub chunk_times_ms: Vec<u64>,
}

/// Rate-limited liveness signal between chunk boundaries.
pub struct HeartbeatTicker {
    last: Instant,
    interval: Duration,
}

impl HeartbeatTicker {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            interval: Duration::from_secs(defaults::HEARTBEAT_SECS),
        }
    }

    pub fn tick(&mut self, emitter: &EventEmitter) {
        if self.last.elapsed() >= self.interval {
            emitter.emit(&Event::Heartbeat {
                ts_ms: Event::now_ms(),
            });
            self.last = Instant::now();
        }
    }
}

impl Default for HeartbeatTicker {
    fn default() -> Self {
        Self::new()
    }
}
