//! Execution profile: the resolved set of knobs governing one run.
//!
//! A profile serves two distinct purposes and both depend on value
//! semantics: the audio-affecting subset feeds the job fingerprint, and
//! `execution_equivalent` gates whether a recovery retry with a fallback
//! profile would actually change anything.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Synthesis backend kind, resolved before the pipeline starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// PyTorch-based runner. The least accelerated, most stable choice.
    Torch,
    /// MLX runner for Apple Silicon.
    Mlx,
    /// Deterministic in-process double for tests and dry runs.
    Mock,
}

impl BackendKind {
    /// Default chunk size for this backend, before host adjustments.
    pub fn default_chunk_chars(self) -> usize {
        match self {
            BackendKind::Mlx => defaults::MLX_CHUNK_CHARS,
            BackendKind::Torch | BackendKind::Mock => defaults::TORCH_CHUNK_CHARS,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Torch => "torch",
            BackendKind::Mlx => "mlx",
            BackendKind::Mock => "mock",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "torch" => Ok(BackendKind::Torch),
            "mlx" => Ok(BackendKind::Mlx),
            "mock" => Ok(BackendKind::Mock),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Chunk pipeline execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Single loop, strict index order. The default.
    Sequential,
    /// Synthesis and convert/export stages overlapped through one bounded
    /// queue. Only valid for streaming MP3 output without checkpointing.
    Overlap3,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMode::Sequential => f.write_str("sequential"),
            PipelineMode::Overlap3 => f.write_str("overlap3"),
        }
    }
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(PipelineMode::Sequential),
            "overlap3" => Ok(PipelineMode::Overlap3),
            other => Err(format!("unknown pipeline mode: {other}")),
        }
    }
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Single-file MP3; the only format eligible for the streaming path.
    Mp3,
    /// M4B audiobook container with chapters and embedded metadata.
    M4b,
}

impl OutputFormat {
    /// Whether the container carries chapter markers and embedded metadata.
    pub fn supports_metadata(self) -> bool {
        matches!(self, OutputFormat::M4b)
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4b => "m4b",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp3" => Ok(OutputFormat::Mp3),
            "m4b" => Ok(OutputFormat::M4b),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Resolved knobs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProfile {
    pub voice: String,
    pub speed: f64,
    /// Language/accent code passed to the backend.
    pub lang: String,
    pub backend: BackendKind,
    /// Hardware acceleration (MPS/Metal) enabled for the backend runner.
    pub accel: bool,
    /// Deprecated compatibility knob; inference is not parallelized.
    /// Retained so profile equivalence and plan consumers keep seeing it.
    pub workers: u32,
    pub pipeline_mode: PipelineMode,
    /// Approximate maximum characters per text chunk.
    pub chunk_chars: usize,
}

impl Default for ExecutionProfile {
    fn default() -> Self {
        Self {
            voice: defaults::DEFAULT_VOICE.to_string(),
            speed: 1.0,
            lang: defaults::DEFAULT_LANG.to_string(),
            backend: BackendKind::Torch,
            accel: false,
            workers: defaults::DEFAULT_WORKERS,
            pipeline_mode: PipelineMode::Sequential,
            chunk_chars: defaults::TORCH_CHUNK_CHARS,
        }
    }
}

impl ExecutionProfile {
    /// Two profiles are execution-equivalent iff the knobs that change how
    /// a run executes all match. Voice/speed/lang are deliberately excluded:
    /// they change the audio, not the execution strategy, so retrying with
    /// the same execution shape would hit the same crash.
    pub fn execution_equivalent(&self, other: &ExecutionProfile) -> bool {
        self.backend == other.backend
            && self.accel == other.accel
            && self.workers == other.workers
            && self.pipeline_mode == other.pipeline_mode
            && self.chunk_chars == other.chunk_chars
    }

    /// Build the safest profile reachable from this one: least-accelerated
    /// backend, acceleration off, one worker, sequential pipeline, chunk
    /// size capped down to the safe floor.
    pub fn fallback(&self) -> ExecutionProfile {
        let backend = match self.backend {
            BackendKind::Mock => BackendKind::Mock,
            _ => BackendKind::Torch,
        };
        ExecutionProfile {
            voice: self.voice.clone(),
            speed: self.speed,
            lang: self.lang.clone(),
            backend,
            accel: false,
            workers: 1,
            pipeline_mode: PipelineMode::Sequential,
            chunk_chars: self.chunk_chars.min(defaults::SAFE_CHUNK_CHARS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_roundtrips_through_str() {
        for kind in [BackendKind::Torch, BackendKind::Mlx, BackendKind::Mock] {
            let parsed: BackendKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("cuda".parse::<BackendKind>().is_err());
    }

    #[test]
    fn fallback_disables_everything_risky() {
        let profile = ExecutionProfile {
            backend: BackendKind::Mlx,
            accel: true,
            workers: 4,
            pipeline_mode: PipelineMode::Overlap3,
            chunk_chars: 900,
            ..ExecutionProfile::default()
        };
        let safe = profile.fallback();
        assert_eq!(safe.backend, BackendKind::Torch);
        assert!(!safe.accel);
        assert_eq!(safe.workers, 1);
        assert_eq!(safe.pipeline_mode, PipelineMode::Sequential);
        assert_eq!(safe.chunk_chars, defaults::SAFE_CHUNK_CHARS);
    }

    #[test]
    fn fallback_never_grows_chunk_size() {
        let profile = ExecutionProfile {
            chunk_chars: 300,
            ..ExecutionProfile::default()
        };
        assert_eq!(profile.fallback().chunk_chars, 300);
    }

    #[test]
    fn fallback_of_safe_profile_is_equivalent() {
        // A job that already ran with the safest knobs has nothing left to
        // downgrade; the recovery controller must not retry it.
        let profile = ExecutionProfile {
            backend: BackendKind::Torch,
            accel: false,
            workers: 1,
            pipeline_mode: PipelineMode::Sequential,
            chunk_chars: 400,
            ..ExecutionProfile::default()
        };
        assert!(profile.execution_equivalent(&profile.fallback()));
    }

    #[test]
    fn voice_does_not_affect_equivalence() {
        let a = ExecutionProfile::default();
        let mut b = a.clone();
        b.voice = "bf_emma".to_string();
        b.speed = 1.25;
        assert!(a.execution_equivalent(&b));
    }

    #[test]
    fn mock_backend_survives_fallback() {
        let profile = ExecutionProfile {
            backend: BackendKind::Mock,
            accel: true,
            ..ExecutionProfile::default()
        };
        assert_eq!(profile.fallback().backend, BackendKind::Mock);
    }
}
