//! Stateful incremental decoder for the event stream.
//!
//! The controller reads a worker's stdout as raw bytes in arbitrary-sized
//! pieces; a frame split across two reads must decode exactly once. The
//! parser also accumulates [`ParserState`] so a delta event (say, a bare
//! phase transition) can be reported alongside the last known progress
//! numbers — state is an explicit value mutated only here, never a pile
//! of globals.

use crate::checkpoint::InvalidReason;
use crate::events::wire::{CheckpointCode, Event, LogLevel, Phase, WorkerState};
use crate::job::JobInspection;
use crate::events::wire::RecoveryNotice;
use std::collections::BTreeMap;

/// Last known view of the worker, rebuilt purely from decoded events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserState {
    pub phase: Option<Phase>,
    pub current_chunk: usize,
    pub total_chunks: usize,
    pub chapter_count: usize,
    pub metadata: BTreeMap<String, String>,
    pub last_checkpoint: Option<CheckpointCode>,
    pub last_heartbeat_ms: Option<u64>,
    pub inspection: Option<JobInspection>,
    pub recoveries: Vec<RecoveryNotice>,
    pub errors: Vec<String>,
    pub done: bool,
}

impl ParserState {
    fn apply(&mut self, event: &Event) {
        match event {
            Event::Phase { phase } => self.phase = Some(*phase),
            Event::Metadata { key, value } => {
                if key == "chapter_count"
                    && let Ok(count) = value.parse()
                {
                    self.chapter_count = count;
                }
                self.metadata.insert(key.clone(), value.clone());
            }
            Event::ParseProgress { chapter_count, .. } => self.chapter_count = *chapter_count,
            Event::Progress {
                current_chunk,
                total_chunks,
            } => {
                self.current_chunk = *current_chunk;
                self.total_chunks = *total_chunks;
            }
            Event::Checkpoint { code } => {
                if let CheckpointCode::Resuming { completed } = code {
                    self.current_chunk = self.current_chunk.max(*completed);
                }
                self.last_checkpoint = Some(code.clone());
            }
            Event::Heartbeat { ts_ms } => self.last_heartbeat_ms = Some(*ts_ms),
            Event::Inspection { result } => self.inspection = Some(result.clone()),
            Event::Recovery { notice } => self.recoveries.push(notice.clone()),
            Event::Error { message } => self.errors.push(message.clone()),
            Event::Done { .. } => self.done = true,
            Event::Timing { .. } | Event::Worker { .. } | Event::Log { .. } => {}
        }
    }
}

/// Incremental parser over one event stream.
#[derive(Debug, Default)]
pub struct EventParser {
    buf: Vec<u8>,
    state: ParserState,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known worker state, updated by every decoded event.
    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Feed a piece of the byte stream; returns every event completed by
    /// this piece, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Event> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing frame that arrived without its newline (stream
    /// end). Call once after the last `push`.
    pub fn finish(&mut self) -> Vec<Event> {
        if self.buf.is_empty() {
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&std::mem::take(&mut self.buf)).into_owned();
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&mut self, line: &str) -> Option<Event> {
        let trimmed = line.trim_end_matches('\r');
        if trimmed.is_empty() {
            return None;
        }

        let event = if trimmed.starts_with('{') {
            match Event::from_json(trimmed) {
                Ok(event) => event,
                // Unknown or malformed structured frames degrade to log
                // lines rather than killing the stream.
                Err(_) => Event::Log {
                    level: LogLevel::Info,
                    message: trimmed.to_string(),
                },
            }
        } else {
            decode_legacy(trimmed)
        };

        self.state.apply(&event);
        Some(event)
    }
}

/// Decode one legacy-format line. Unrecognized lines become info logs so
/// stray backend output never corrupts the stream.
fn decode_legacy(line: &str) -> Event {
    let log = |line: &str| Event::Log {
        level: LogLevel::Info,
        message: line.to_string(),
    };

    if let Some(rest) = line.strip_prefix("PHASE:") {
        return match Phase::parse(rest) {
            Some(phase) => Event::Phase { phase },
            None => log(line),
        };
    }
    if let Some(rest) = line.strip_prefix("METADATA:") {
        let mut parts = rest.splitn(2, ':');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        return Event::Metadata {
            key: key.to_string(),
            value: value.to_string(),
        };
    }
    if let Some(rest) = line.strip_prefix("PARSE_PROGRESS:") {
        let mut parts = rest.splitn(2, ':');
        let ratio = parts.next().unwrap_or_default();
        let chapters = parts.next().unwrap_or_default();
        if let (Some((current, total)), Ok(chapter_count)) =
            (parse_ratio(ratio), chapters.parse())
        {
            return Event::ParseProgress {
                current_item: current,
                total_items: total,
                chapter_count,
            };
        }
        return log(line);
    }
    if let Some(rest) = line.strip_prefix("TIMING:") {
        let mut parts = rest.splitn(2, ':');
        if let (Some(Ok(chunk_idx)), Some(Ok(chunk_ms))) = (
            parts.next().map(str::parse),
            parts.next().map(str::parse),
        ) {
            return Event::Timing { chunk_idx, chunk_ms };
        }
        return log(line);
    }
    if let Some(rest) = line.strip_prefix("HEARTBEAT:") {
        return match rest.parse() {
            Ok(ts_ms) => Event::Heartbeat { ts_ms },
            Err(_) => log(line),
        };
    }
    if let Some(rest) = line.strip_prefix("WORKER:") {
        let mut parts = rest.splitn(3, ':');
        if let (Some(Ok(id)), Some(Some(state)), detail) = (
            parts.next().map(str::parse),
            parts.next().map(WorkerState::parse),
            parts.next().unwrap_or_default(),
        ) {
            return Event::Worker {
                id,
                state,
                detail: detail.to_string(),
            };
        }
        return log(line);
    }
    if let Some(rest) = line.strip_prefix("PROGRESS:") {
        let ratio = rest.strip_suffix(" chunks").unwrap_or(rest);
        if let Some((current_chunk, total_chunks)) = parse_ratio(ratio) {
            return Event::Progress {
                current_chunk,
                total_chunks,
            };
        }
        return log(line);
    }
    if let Some(rest) = line.strip_prefix("CHECKPOINT:") {
        return match decode_checkpoint(rest) {
            Some(code) => Event::Checkpoint { code },
            None => log(line),
        };
    }
    if let Some(rest) = line.strip_prefix("INSPECTION:") {
        return match serde_json::from_str::<JobInspection>(rest) {
            Ok(result) => Event::Inspection { result },
            Err(_) => log(line),
        };
    }
    if let Some(rest) = line.strip_prefix("RECOVERY:") {
        return match serde_json::from_str::<RecoveryNotice>(rest) {
            Ok(notice) => Event::Recovery { notice },
            Err(_) => log(line),
        };
    }
    if let Some(rest) = line.strip_prefix("ERROR:") {
        return Event::Error {
            message: rest.to_string(),
        };
    }
    if line == "DONE" {
        return Event::Done {
            output: None,
            chunks: None,
        };
    }
    if let Some(rest) = line.strip_prefix("WARN: ") {
        return Event::Log {
            level: LogLevel::Warning,
            message: rest.to_string(),
        };
    }

    log(line)
}

fn parse_ratio(s: &str) -> Option<(usize, usize)> {
    let (left, right) = s.split_once('/')?;
    Some((left.parse().ok()?, right.parse().ok()?))
}

fn decode_checkpoint(rest: &str) -> Option<CheckpointCode> {
    let mut parts = rest.splitn(2, ':');
    let code = parts.next()?;
    let detail = parts.next();

    match (code, detail) {
        ("NONE", None) => Some(CheckpointCode::None),
        ("CLEANED", None) => Some(CheckpointCode::Cleaned),
        ("FOUND", Some(detail)) => {
            let (total, completed) = detail.split_once(':')?;
            Some(CheckpointCode::Found {
                total: total.parse().ok()?,
                completed: completed.parse().ok()?,
            })
        }
        ("INVALID", Some(reason)) => {
            let reason = match reason {
                "hash_mismatch" => InvalidReason::HashMismatch,
                "config_mismatch" => InvalidReason::ConfigMismatch,
                "chunk_mismatch" => InvalidReason::ChunkMismatch,
                _ => return None,
            };
            Some(CheckpointCode::Invalid { reason })
        }
        ("RESUMING", Some(n)) => Some(CheckpointCode::Resuming {
            completed: n.parse().ok()?,
        }),
        ("REUSED", Some(i)) => Some(CheckpointCode::Reused {
            chunk: i.parse().ok()?,
        }),
        ("MISSING_AUDIO", Some(i)) => Some(CheckpointCode::MissingAudio {
            chunk: i.parse().ok()?,
        }),
        ("SAVED", Some(i)) => Some(CheckpointCode::Saved {
            chunk: i.parse().ok()?,
        }),
        _ => None,
    }
}
