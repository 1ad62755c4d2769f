//! Durable per-chunk progress for one output path.
//!
//! For output `P` the store owns `P.checkpoint/` containing `state.json`
//! and one WAV record per completed chunk, named by zero-padded index.
//! State is deleted only on successful completion; every other exit leaves
//! it intact so the next run can resume.

use crate::error::{BookvoxError, Result};
use crate::profile::{BackendKind, OutputFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "state.json";

/// The config subset that affects generated audio byte-for-byte.
///
/// Two runs with equal [`Fingerprint`]s must produce identical per-chunk
/// audio; anything that could change a sample belongs here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintConfig {
    pub voice: String,
    /// Speed formatted to three decimals so float noise cannot flip
    /// fingerprint equality.
    pub speed: String,
    pub lang: String,
    pub backend: BackendKind,
    pub chunk_chars: usize,
    pub split_pattern: String,
    pub format: OutputFormat,
    pub bitrate: String,
    pub normalize: bool,
}

impl FingerprintConfig {
    pub fn format_speed(speed: f64) -> String {
        format!("{speed:.3}")
    }
}

/// Identifies whether a checkpoint is reusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// sha256 of the source file contents, hex-encoded.
    pub source_hash: String,
    pub config: FingerprintConfig,
}

/// Hash the source input file.
pub fn compute_source_hash(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Why a checkpoint was rejected for resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Source file contents changed since the checkpoint was written.
    HashMismatch,
    /// An audio-affecting knob changed.
    ConfigMismatch,
    /// The current chunking pass produced a different chunk count.
    ChunkMismatch,
}

impl InvalidReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidReason::HashMismatch => "hash_mismatch",
            InvalidReason::ConfigMismatch => "config_mismatch",
            InvalidReason::ChunkMismatch => "chunk_mismatch",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted checkpoint state for one output path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub fingerprint: Fingerprint,
    pub total_chunks: usize,
    pub completed_chunks: BTreeSet<usize>,
    /// `(chunk_index, title)` pairs for chapter-timing reconstruction.
    pub chapter_starts: Vec<(usize, String)>,
}

/// Planning-time view of a checkpoint, embedded in inspection payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInspection {
    pub exists: bool,
    pub resume_compatible: bool,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub reason: Option<String>,
    /// Indices claimed complete whose audio record is missing or
    /// unreadable; they will be regenerated.
    pub missing_audio_chunks: Vec<usize>,
}

impl CheckpointInspection {
    pub fn absent() -> Self {
        Self {
            exists: false,
            resume_compatible: false,
            total_chunks: 0,
            completed_chunks: 0,
            reason: None,
            missing_audio_chunks: Vec::new(),
        }
    }
}

/// Checkpoint directory for an output path: `<output>.checkpoint/`.
pub fn checkpoint_dir(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".checkpoint");
    output.with_file_name(name)
}

/// Handle to one output path's checkpoint directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn for_output(output: &Path) -> Self {
        Self {
            dir: checkpoint_dir(output),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.join(STATE_FILE).is_file()
    }

    /// Load persisted state, or `None` when no checkpoint exists.
    pub fn load_state(&self) -> Result<Option<CheckpointState>> {
        let path = self.dir.join(STATE_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: CheckpointState = serde_json::from_str(&contents)?;
        Ok(Some(state))
    }

    /// Persist state, creating the directory on first write. The write goes
    /// through a temp file + rename so an interrupted save never leaves a
    /// half-written state record.
    pub fn save_state(&self, state: &CheckpointState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{STATE_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, self.dir.join(STATE_FILE))?;
        Ok(())
    }

    fn chunk_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("chunk_{index:06}.wav"))
    }

    /// Persist one chunk's audio as an i16 mono WAV record.
    pub fn save_chunk_audio(&self, index: usize, samples: &[i16], sample_rate: u32) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(self.chunk_path(index), spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Read one chunk's persisted audio.
    ///
    /// Returns `None` when the record is missing or unreadable — orphaned
    /// entries are never fatal, the chunk is simply regenerated.
    pub fn load_chunk_audio(&self, index: usize) -> Option<Vec<i16>> {
        let reader = hound::WavReader::open(self.chunk_path(index)).ok()?;
        reader.into_samples::<i16>().collect::<std::result::Result<Vec<_>, _>>().ok()
    }

    /// Whether a chunk's audio record is present and readable.
    pub fn chunk_audio_readable(&self, index: usize) -> bool {
        self.load_chunk_audio(index).is_some()
    }

    /// Delete the entire checkpoint directory.
    pub fn cleanup(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BookvoxError::Checkpoint {
                message: format!("failed to remove {}: {e}", self.dir.display()),
            }),
        }
    }

    /// Verify that persisted state can seed a resume of the current run.
    pub fn verify(
        state: &CheckpointState,
        fingerprint: &Fingerprint,
        expected_total_chunks: usize,
    ) -> std::result::Result<(), InvalidReason> {
        if state.fingerprint.source_hash != fingerprint.source_hash {
            return Err(InvalidReason::HashMismatch);
        }
        if state.fingerprint.config != fingerprint.config {
            return Err(InvalidReason::ConfigMismatch);
        }
        if state.total_chunks != expected_total_chunks {
            return Err(InvalidReason::ChunkMismatch);
        }
        Ok(())
    }

    /// Planning-time inspection: compatibility plus which completed chunks
    /// have lost their audio records.
    pub fn inspect(
        &self,
        fingerprint: &Fingerprint,
        expected_total_chunks: usize,
    ) -> Result<CheckpointInspection> {
        let Some(state) = self.load_state()? else {
            return Ok(CheckpointInspection::absent());
        };

        let verdict = Self::verify(&state, fingerprint, expected_total_chunks);
        let missing_audio_chunks: Vec<usize> = if verdict.is_ok() {
            state
                .completed_chunks
                .iter()
                .copied()
                .filter(|&idx| !self.chunk_audio_readable(idx))
                .collect()
        } else {
            Vec::new()
        };

        Ok(CheckpointInspection {
            exists: true,
            resume_compatible: verdict.is_ok(),
            total_chunks: state.total_chunks,
            completed_chunks: state.completed_chunks.len(),
            reason: verdict.err().map(|r| r.as_str().to_string()),
            missing_audio_chunks,
        })
    }
}
