//! Default configuration constants for bookvox.
//!
//! Shared across config, profile resolution, and the pipeline so that
//! tuning values live in exactly one place.

/// Sample rate produced by the synthesis backends, in Hz.
///
/// Kokoro-family models emit 24kHz mono; everything downstream (spool,
/// chapter timebase, ffmpeg input args) assumes this rate.
pub const SAMPLE_RATE: u32 = 24000;

/// Default chunk size in characters for the torch backend.
///
/// Benchmarked sweet spot: ~98 chars/s at 600, only +3% at 1200 with a
/// much larger memory footprint.
pub const TORCH_CHUNK_CHARS: usize = 600;

/// Default chunk size in characters for the MLX backend.
pub const MLX_CHUNK_CHARS: usize = 900;

/// Chunk size floor used by the recovery fallback profile and on
/// low-memory hosts.
pub const SAFE_CHUNK_CHARS: usize = 400;

/// Default voice identifier passed to the synthesis backend.
pub const DEFAULT_VOICE: &str = "af_heart";

/// Default language/accent code.
pub const DEFAULT_LANG: &str = "a";

/// Regex handed to the backend for its internal text splitting.
pub const DEFAULT_SPLIT_PATTERN: &str = r"\n+";

/// Default encoder bitrate.
pub const DEFAULT_BITRATE: &str = "192k";

/// Bitrates accepted by the CLI and config.
pub const BITRATES: &[&str] = &["128k", "192k", "320k"];

/// Seconds between heartbeat events while a job is running.
pub const HEARTBEAT_SECS: u64 = 5;

/// Bound of the PCM channel between the synthesis and encode stages of
/// the overlapped pipeline. A full channel blocks synthesis (backpressure).
pub const OVERLAP_QUEUE_DEPTH: usize = 4;

/// Number of trailing stderr lines kept per worker run for failure
/// classification.
pub const STDERR_TAIL_LINES: usize = 40;

/// Maximum attempts per job including the recovery retry.
pub const MAX_RECOVERY_ATTEMPTS: u32 = 2;

/// Deprecated worker-count knob default. Inference is sequential; the
/// field survives for plan-consumer compatibility.
pub const DEFAULT_WORKERS: u32 = 1;
