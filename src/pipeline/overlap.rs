//! Overlapped pipeline: synthesis and encoding on separate threads.
//!
//! One bounded channel connects the two stages, so synthesis can run at
//! most [`defaults::OVERLAP_QUEUE_DEPTH`] chunks ahead of the encoder.
//! Chunks travel through the channel in index order, so the sink still
//! sees strictly ordered audio. No checkpointing here: the caller enforces
//! that this strategy only runs for streaming output without persistence.

use super::{ChunkSink, HeartbeatTicker, PipelineRunResult};
use crate::chunking::TextChunk;
use crate::defaults;
use crate::error::{BookvoxError, Result};
use crate::events::{Event, EventEmitter, WorkerState};
use crate::synth::SpeechBackend;
use crossbeam_channel::bounded;
use std::time::Instant;

pub fn run_overlap(
    backend: Box<dyn SpeechBackend>,
    chunks: &[TextChunk],
    sink: &mut dyn ChunkSink,
    emitter: &EventEmitter,
) -> Result<PipelineRunResult> {
    let total = chunks.len();
    let (tx, rx) = bounded::<Result<(usize, Vec<i16>)>>(defaults::OVERLAP_QUEUE_DEPTH);

    std::thread::scope(|scope| {
        let synth_emitter = emitter.clone();
        scope.spawn(move || {
            for (idx, chunk) in chunks.iter().enumerate() {
                synth_emitter.emit(&Event::Worker {
                    id: 0,
                    state: WorkerState::Infer,
                    detail: format!("Chunk {}/{}", idx + 1, total),
                });

                let started = Instant::now();
                let result = backend.synthesize(&chunk.text).map_err(|e| match e {
                    BookvoxError::Synthesis { message, .. } => {
                        BookvoxError::Synthesis { chunk: idx, message }
                    }
                    other => other,
                });
                let failed = result.is_err();
                if !failed {
                    synth_emitter.emit(&Event::Timing {
                        chunk_idx: idx,
                        chunk_ms: started.elapsed().as_millis() as u64,
                    });
                }

                // A closed channel means the encoder bailed; stop producing.
                if tx.send(result.map(|samples| (idx, samples))).is_err() || failed {
                    break;
                }
            }
            synth_emitter.emit(&Event::Worker {
                id: 0,
                state: WorkerState::Idle,
                detail: String::new(),
            });
        });

        let mut offsets = Vec::with_capacity(total);
        // Wall-time per chunk is reported through timing events on the
        // synthesis thread; the result carries zeros here.
        let times = vec![0u64; total];
        let mut total_samples: u64 = 0;
        let mut heartbeat = HeartbeatTicker::new();

        for item in rx {
            let (idx, samples) = item?;
            heartbeat.tick(emitter);
            offsets.push(total_samples);

            emitter.emit(&Event::Worker {
                id: 1,
                state: WorkerState::Encode,
                detail: format!("Chunk {}/{}", idx + 1, total),
            });
            total_samples += samples.len() as u64;
            sink.write_samples(&samples)?;

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
    })
}
