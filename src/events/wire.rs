//! Event types and their two wire encodings.
//!
//! The sum type replaces the original string-keyed payloads: adding an
//! event kind is a compile-checked change, and consumers match
//! exhaustively instead of dispatching on strings.

use crate::checkpoint::InvalidReason;
use crate::job::JobInspection;
use crate::profile::ExecutionProfile;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Parsing,
    Inference,
    Concatenating,
    Exporting,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Parsing => "PARSING",
            Phase::Inference => "INFERENCE",
            Phase::Concatenating => "CONCATENATING",
            Phase::Exporting => "EXPORTING",
            Phase::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PARSING" => Some(Phase::Parsing),
            "INFERENCE" => Some(Phase::Inference),
            "CONCATENATING" => Some(Phase::Concatenating),
            "EXPORTING" => Some(Phase::Exporting),
            "DONE" => Some(Phase::Done),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker activity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Idle,
    Infer,
    Encode,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "IDLE",
            WorkerState::Infer => "INFER",
            WorkerState::Encode => "ENCODE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(WorkerState::Idle),
            "INFER" => Some(WorkerState::Infer),
            "ENCODE" => Some(WorkerState::Encode),
            _ => None,
        }
    }
}

/// Checkpoint status codes reported during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CheckpointCode {
    /// No checkpoint exists for this output path.
    None,
    /// A checkpoint exists; probe-only report.
    Found { total: usize, completed: usize },
    /// A checkpoint exists but cannot seed this run.
    Invalid { reason: InvalidReason },
    /// Resuming with `completed` chunks already done.
    Resuming { completed: usize },
    /// Persisted audio for this chunk was reused.
    Reused { chunk: usize },
    /// Chunk claimed complete but its audio record is gone; regenerating.
    MissingAudio { chunk: usize },
    /// Chunk audio persisted.
    Saved { chunk: usize },
    /// Checkpoint directory deleted after successful completion.
    Cleaned,
}

/// Log severity for freeform worker output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
}

/// Payload emitted before a recovery retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryNotice {
    pub attempt: u32,
    pub max_attempts: u32,
    pub reason: String,
    /// The full fallback profile, so the controller can surface it
    /// without re-deriving the downgrade.
    pub profile: ExecutionProfile,
}

/// One immutable point in the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Phase {
        phase: Phase,
    },
    Metadata {
        key: String,
        value: String,
    },
    ParseProgress {
        current_item: usize,
        total_items: usize,
        chapter_count: usize,
    },
    Timing {
        chunk_idx: usize,
        chunk_ms: u64,
    },
    Heartbeat {
        ts_ms: u64,
    },
    Worker {
        id: u32,
        state: WorkerState,
        detail: String,
    },
    Progress {
        current_chunk: usize,
        total_chunks: usize,
    },
    Checkpoint {
        #[serde(flatten)]
        code: CheckpointCode,
    },
    Recovery {
        #[serde(flatten)]
        notice: RecoveryNotice,
    },
    Inspection {
        result: JobInspection,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Error {
        message: String,
    },
    Done {
        output: Option<String>,
        chunks: Option<usize>,
    },
}

impl Event {
    /// Serialize to the JSON-lines encoding (no trailing newline).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from one JSON frame.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to the legacy line-oriented encoding (no trailing
    /// newline). Byte-compatible with the historical worker output.
    pub fn to_legacy(&self) -> String {
        match self {
            Event::Phase { phase } => format!("PHASE:{phase}"),
            Event::Metadata { key, value } => format!("METADATA:{key}:{value}"),
            Event::ParseProgress {
                current_item,
                total_items,
                chapter_count,
            } => format!("PARSE_PROGRESS:{current_item}/{total_items}:{chapter_count}"),
            Event::Timing { chunk_idx, chunk_ms } => format!("TIMING:{chunk_idx}:{chunk_ms}"),
            Event::Heartbeat { ts_ms } => format!("HEARTBEAT:{ts_ms}"),
            Event::Worker { id, state, detail } => {
                format!("WORKER:{id}:{}:{detail}", state.as_str())
            }
            Event::Progress {
                current_chunk,
                total_chunks,
            } => format!("PROGRESS:{current_chunk}/{total_chunks} chunks"),
            Event::Checkpoint { code } => match code {
                CheckpointCode::None => "CHECKPOINT:NONE".to_string(),
                CheckpointCode::Found { total, completed } => {
                    format!("CHECKPOINT:FOUND:{total}:{completed}")
                }
                CheckpointCode::Invalid { reason } => format!("CHECKPOINT:INVALID:{reason}"),
                CheckpointCode::Resuming { completed } => format!("CHECKPOINT:RESUMING:{completed}"),
                CheckpointCode::Reused { chunk } => format!("CHECKPOINT:REUSED:{chunk}"),
                CheckpointCode::MissingAudio { chunk } => {
                    format!("CHECKPOINT:MISSING_AUDIO:{chunk}")
                }
                CheckpointCode::Saved { chunk } => format!("CHECKPOINT:SAVED:{chunk}"),
                CheckpointCode::Cleaned => "CHECKPOINT:CLEANED".to_string(),
            },
            Event::Recovery { notice } => format!(
                "RECOVERY:{}",
                serde_json::to_string(notice).unwrap_or_default()
            ),
            Event::Inspection { result } => format!(
                "INSPECTION:{}",
                serde_json::to_string(result).unwrap_or_default()
            ),
            Event::Log { level, message } => match level {
                LogLevel::Info => message.clone(),
                LogLevel::Warning => format!("WARN: {message}"),
            },
            Event::Error { message } => format!("ERROR:{message}"),
            Event::Done { .. } => "DONE".to_string(),
        }
    }

    /// Current wall-clock timestamp in milliseconds, for heartbeats.
    pub fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
