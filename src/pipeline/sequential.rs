//! Sequential pipeline: one loop, strict index order.
//!
//! This is the only strategy allowed to touch the checkpoint store. The
//! per-chunk commit order is fixed: audio record first, then state. A
//! crash between the two leaves an orphaned record that the next run
//! overwrites; the reverse order could mark a chunk complete with no
//! audio behind it.

use super::{ChunkSink, HeartbeatTicker, PipelineRunResult};
use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::chunking::TextChunk;
use crate::error::{BookvoxError, Result};
use crate::events::{CheckpointCode, Event, EventEmitter, WorkerState};
use crate::synth::SpeechBackend;
use std::time::Instant;

pub fn run_sequential(
    backend: &dyn SpeechBackend,
    chunks: &[TextChunk],
    sink: &mut dyn ChunkSink,
    emitter: &EventEmitter,
    mut checkpoint: Option<(&CheckpointStore, &mut CheckpointState)>,
) -> Result<PipelineRunResult> {
    let total = chunks.len();
    let mut offsets = Vec::with_capacity(total);
    let mut times = Vec::with_capacity(total);
    let mut total_samples: u64 = 0;
    let mut heartbeat = HeartbeatTicker::new();

    for (idx, chunk) in chunks.iter().enumerate() {
        offsets.push(total_samples);
        heartbeat.tick(emitter);

        // Resume path: replay persisted audio instead of re-synthesizing.
        if let Some((store, state)) = checkpoint.as_mut()
            && state.completed_chunks.contains(&idx)
        {
            match store.load_chunk_audio(idx) {
                Some(samples) => {
                    emitter.emit(&Event::Checkpoint {
                        code: CheckpointCode::Reused { chunk: idx },
                    });
                    total_samples += samples.len() as u64;
                    times.push(0);
                    sink.write_samples(&samples)?;
                    emitter.emit(&Event::Progress {
                        current_chunk: idx + 1,
                        total_chunks: total,
                    });
                    continue;
                }
                None => {
                    // Orphaned record: demote to pending and persist the
                    // demotion before regenerating.
                    emitter.emit(&Event::Checkpoint {
                        code: CheckpointCode::MissingAudio { chunk: idx },
                    });
                    state.completed_chunks.remove(&idx);
                    store.save_state(state)?;
                }
            }
        }

        emitter.emit(&Event::Worker {
            id: 0,
            state: WorkerState::Infer,
            detail: format!("Chunk {}/{}", idx + 1, total),
        });

        let started = Instant::now();
        let samples = backend
            .synthesize(&chunk.text)
            .map_err(|e| match e {
                BookvoxError::Synthesis { message, .. } => {
                    BookvoxError::Synthesis { chunk: idx, message }
                }
                other => other,
            })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        emitter.emit(&Event::Timing {
            chunk_idx: idx,
            chunk_ms: elapsed_ms,
        });
        times.push(elapsed_ms);

        emitter.emit(&Event::Worker {
            id: 0,
            state: WorkerState::Encode,
            detail: format!("Chunk {}/{}", idx + 1, total),
        });
        total_samples += samples.len() as u64;
        sink.write_samples(&samples)?;

        if let Some((store, state)) = checkpoint.as_mut() {
            store.save_chunk_audio(idx, &samples, backend.sample_rate())?;
            state.completed_chunks.insert(idx);
            store.save_state(state)?;
            emitter.emit(&Event::Checkpoint {
                code: CheckpointCode::Saved { chunk: idx },
            });
        }

        emitter.emit(&Event::Progress {
            current_chunk: idx + 1,
            total_chunks: total,
        });
    }

    Ok(PipelineRunResult {
        chunk_sample_offsets: offsets,
        total_samples,
        chunk_times_ms: times,
    })
}
