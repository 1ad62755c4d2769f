//! Progress-event protocol between a worker process and its controller.
//!
//! Events are discrete, independently decodable frames on one ordered
//! stream. Two encodings exist — the legacy line-oriented format and JSON
//! lines — and one stateful parser decodes both, tolerating frames split
//! across reads.

pub mod emitter;
pub mod parser;
pub mod wire;

pub use emitter::{EventEmitter, EventFormat, spawn_writer};
pub use parser::{EventParser, ParserState};
pub use wire::{CheckpointCode, Event, LogLevel, Phase, RecoveryNotice, WorkerState};
