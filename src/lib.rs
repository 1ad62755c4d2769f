//! bookvox - Long-form text to audiobook conversion
//!
//! Chunked, resumable synthesis with checkpointed progress and ffmpeg
//! export to mp3 or chaptered m4b.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod batch;
pub mod checkpoint;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod exec;
pub mod export;
pub mod job;
pub mod pipeline;
pub mod profile;
pub mod recovery;
pub mod runtime;
pub mod source;
pub mod synth;

// Synthesis seam (chunk text → PCM samples)
pub use synth::SpeechBackend;

// Job surface
pub use job::{JobInspection, JobRequest, JobSummary, PreparedJob};

// Batch scheduling
pub use batch::{BatchPlan, BatchReport, JobPlan, JobResult};

// Execution boundary
pub use exec::{JobExecutor, JobOutcome, WorkerExecutor};

// Error handling
pub use error::{BookvoxError, Result};

// Config
pub use config::Config;

// Event protocol
pub use events::{Event, EventEmitter, EventParser, ParserState};
