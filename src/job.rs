//! Job preparation and the worker-side run loop.
//!
//! A job is one input book to one output file. Preparation resolves every
//! `auto` knob, parses the book, chunks it, and probes the checkpoint;
//! the run loop then drives the pipeline, export, and checkpoint lifecycle
//! while reporting progress through the event emitter.

use crate::checkpoint::{
    CheckpointInspection, CheckpointState, CheckpointStore, Fingerprint, FingerprintConfig,
    compute_source_hash,
};
use crate::chunking::{TextChunk, split_text_to_chunks};
use crate::defaults;
use crate::error::{BookvoxError, Result};
use crate::events::{CheckpointCode, Event, EventEmitter, Phase};
use crate::export::{ExportSettings, Mp3Stream, PcmSpool, build_chapters};
use crate::pipeline::{ChunkSink, run_overlap, run_sequential};
use crate::profile::{ExecutionProfile, OutputFormat, PipelineMode};
use crate::runtime::{
    AccelChoice, default_chunk_chars, is_low_memory_host, resolve_accel, resolve_backend,
    resolve_pipeline_mode,
};
use crate::source::{BookMetadata, MetadataOverrides, source_for};
use crate::synth::create_backend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything one job needs, as requested (before resolution).
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub voice: String,
    pub speed: f64,
    pub lang: String,
    /// `"auto"` or an explicit backend name.
    pub backend: String,
    pub accel: AccelChoice,
    pub workers: u32,
    pub pipeline_mode: Option<PipelineMode>,
    pub chunk_chars: Option<usize>,
    pub split_pattern: String,
    pub format: OutputFormat,
    pub bitrate: String,
    pub normalize: bool,
    pub checkpoint: bool,
    pub resume: bool,
    pub overrides: MetadataOverrides,
}

impl JobRequest {
    pub fn use_checkpoint(&self) -> bool {
        self.checkpoint || self.resume
    }

    fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(BookvoxError::ConfigInvalidValue {
                key: "speed".to_string(),
                message: format!("must be a positive number, got {}", self.speed),
            });
        }
        if !defaults::BITRATES.contains(&self.bitrate.as_str()) {
            return Err(BookvoxError::ConfigInvalidValue {
                key: "bitrate".to_string(),
                message: format!(
                    "must be one of {}, got {}",
                    defaults::BITRATES.join(", "),
                    self.bitrate
                ),
            });
        }
        Ok(())
    }
}

/// A job after resolution, parsing, and chunking.
#[derive(Debug)]
pub struct PreparedJob {
    pub profile: ExecutionProfile,
    pub metadata: BookMetadata,
    pub chunks: Vec<TextChunk>,
    pub chapter_starts: Vec<(usize, String)>,
    pub total_chars: usize,
    pub fingerprint: Fingerprint,
    pub store: CheckpointStore,
    pub warnings: Vec<String>,
}

/// The audio-affecting config subset, from request plus resolved knobs.
pub fn build_fingerprint_config(
    request: &JobRequest,
    profile: &ExecutionProfile,
) -> FingerprintConfig {
    FingerprintConfig {
        voice: request.voice.clone(),
        speed: FingerprintConfig::format_speed(request.speed),
        lang: request.lang.clone(),
        backend: profile.backend,
        chunk_chars: profile.chunk_chars,
        split_pattern: request.split_pattern.clone(),
        format: request.format,
        bitrate: request.bitrate.clone(),
        normalize: request.normalize,
    }
}

/// Resolve, parse, and chunk one job.
pub fn prepare_job(
    request: &JobRequest,
    mut progress: Option<&mut dyn FnMut(usize, usize, usize)>,
) -> Result<PreparedJob> {
    request.validate()?;

    let backend = resolve_backend(&request.backend).map_err(|message| {
        BookvoxError::ConfigInvalidValue {
            key: "backend".to_string(),
            message,
        }
    })?;
    let (accel, accel_warnings) = resolve_accel(request.accel, backend);
    let chunk_chars = request
        .chunk_chars
        .unwrap_or_else(|| default_chunk_chars(backend));
    let (pipeline_mode, mode_warnings) = resolve_pipeline_mode(
        request.pipeline_mode,
        request.format,
        request.use_checkpoint(),
    );

    let mut warnings: Vec<String> = accel_warnings.into_iter().chain(mode_warnings).collect();
    if is_low_memory_host() && request.backend == "auto" && request.accel == AccelChoice::Auto {
        warnings.push(format!(
            "Low-memory host detected: auto mode will run unaccelerated with \
             {chunk_chars}-character chunks for stability."
        ));
    }

    let source = source_for(&request.input);
    let book = match progress.as_mut() {
        Some(cb) => source.parse(&request.input, Some(cb))?,
        None => source.parse(&request.input, None)?,
    };

    let sections: Vec<(String, String)> = book
        .sections
        .iter()
        .map(|s| (s.title.clone(), s.text.clone()))
        .collect();
    let (chunks, chapter_starts) = split_text_to_chunks(&sections, chunk_chars);
    if chunks.is_empty() {
        return Err(BookvoxError::EmptyInput);
    }
    let total_chars = chunks.iter().map(|c| c.text.chars().count()).sum();

    // Metadata overrides only matter for containers that embed tags.
    let metadata = if request.format.supports_metadata() {
        request.overrides.apply(book.metadata)?
    } else {
        book.metadata
    };

    let profile = ExecutionProfile {
        voice: request.voice.clone(),
        speed: request.speed,
        lang: request.lang.clone(),
        backend,
        accel,
        workers: request.workers,
        pipeline_mode,
        chunk_chars,
    };

    let fingerprint = Fingerprint {
        source_hash: compute_source_hash(&request.input)?,
        config: build_fingerprint_config(request, &profile),
    };

    Ok(PreparedJob {
        profile,
        metadata,
        chunks,
        chapter_starts,
        total_chars,
        fingerprint,
        store: CheckpointStore::for_output(&request.output),
        warnings,
    })
}

/// Book metadata summary embedded in inspection payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMetadataSummary {
    pub title: String,
    pub author: String,
    pub has_cover: bool,
}

/// Planning-time view of one job, produced without synthesizing anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInspection {
    pub input_path: String,
    pub output_path: String,
    pub resolved_backend: String,
    pub resolved_accel: bool,
    pub resolved_chunk_chars: usize,
    pub resolved_pipeline_mode: String,
    pub output_format: String,
    pub total_chars: usize,
    pub total_chunks: usize,
    pub chapter_count: usize,
    pub book_metadata: BookMetadataSummary,
    pub checkpoint: CheckpointInspection,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Inspect a job: resolution, chunk counts, and checkpoint compatibility.
pub fn inspect_job(request: &JobRequest) -> Result<JobInspection> {
    let prepared = prepare_job(request, None)?;
    let checkpoint = prepared
        .store
        .inspect(&prepared.fingerprint, prepared.chunks.len())?;

    let mut warnings = prepared.warnings.clone();
    if !checkpoint.missing_audio_chunks.is_empty() {
        warnings.push(format!(
            "Checkpoint is missing {} saved chunk audio record(s); those chunks will be \
             regenerated.",
            checkpoint.missing_audio_chunks.len()
        ));
    }

    Ok(JobInspection {
        input_path: request.input.display().to_string(),
        output_path: request.output.display().to_string(),
        resolved_backend: prepared.profile.backend.to_string(),
        resolved_accel: prepared.profile.accel,
        resolved_chunk_chars: prepared.profile.chunk_chars,
        resolved_pipeline_mode: prepared.profile.pipeline_mode.to_string(),
        output_format: request.format.to_string(),
        total_chars: prepared.total_chars,
        total_chunks: prepared.chunks.len(),
        chapter_count: prepared.chapter_starts.len(),
        book_metadata: BookMetadataSummary {
            title: prepared.metadata.title.clone(),
            author: prepared.metadata.author.clone(),
            has_cover: prepared.metadata.cover_image.is_some(),
        },
        checkpoint,
        warnings,
        errors: Vec::new(),
    })
}

/// Cheap checkpoint probe: reports existence and source-hash compatibility
/// without parsing or chunking the book.
pub fn check_checkpoint(request: &JobRequest, emitter: &EventEmitter) -> Result<()> {
    let store = CheckpointStore::for_output(&request.output);
    let code = match store.load_state()? {
        None => CheckpointCode::None,
        Some(state) => {
            let current_hash = compute_source_hash(&request.input)?;
            if state.fingerprint.source_hash != current_hash {
                CheckpointCode::Invalid {
                    reason: crate::checkpoint::InvalidReason::HashMismatch,
                }
            } else {
                CheckpointCode::Found {
                    total: state.total_chunks,
                    completed: state.completed_chunks.len(),
                }
            }
        }
    };
    emitter.emit(&Event::Checkpoint { code });
    Ok(())
}

/// Emit book metadata (title, author, cover presence) and nothing else.
pub fn extract_metadata(request: &JobRequest, emitter: &EventEmitter) -> Result<()> {
    let metadata = source_for(&request.input).extract_metadata(&request.input)?;
    emitter.emit(&Event::Metadata {
        key: "title".to_string(),
        value: metadata.title,
    });
    emitter.emit(&Event::Metadata {
        key: "author".to_string(),
        value: metadata.author,
    });
    emitter.emit(&Event::Metadata {
        key: "has_cover".to_string(),
        value: metadata.cover_image.is_some().to_string(),
    });
    Ok(())
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub output: PathBuf,
    pub total_chunks: usize,
}

enum Sink {
    Stream(Mp3Stream),
    Spool(PcmSpool),
}

impl Sink {
    fn as_chunk_sink(&mut self) -> &mut dyn ChunkSink {
        match self {
            Sink::Stream(stream) => stream,
            Sink::Spool(spool) => spool,
        }
    }
}

/// Run one job end to end: parse, synthesize, export, and manage the
/// checkpoint lifecycle. This is the worker-side main loop.
pub fn run_job(request: &JobRequest, emitter: &EventEmitter) -> Result<JobSummary> {
    if request.workers != 1 {
        emitter.warn(format!(
            "workers={} is a compatibility setting; inference remains sequential.",
            request.workers
        ));
    }

    emitter.emit(&Event::Phase {
        phase: Phase::Parsing,
    });
    let parse_emitter = emitter.clone();
    let mut on_parse = |current_item: usize, total_items: usize, chapter_count: usize| {
        parse_emitter.emit(&Event::ParseProgress {
            current_item,
            total_items,
            chapter_count,
        });
    };
    let prepared = prepare_job(request, Some(&mut on_parse))?;

    emitter.emit(&Event::Metadata {
        key: "backend_resolved".to_string(),
        value: prepared.profile.backend.to_string(),
    });
    emitter.emit(&Event::Metadata {
        key: "accel_resolved".to_string(),
        value: prepared.profile.accel.to_string(),
    });
    emitter.emit(&Event::Metadata {
        key: "pipeline_mode".to_string(),
        value: prepared.profile.pipeline_mode.to_string(),
    });
    for warning in &prepared.warnings {
        emitter.warn(warning.clone());
    }
    emitter.emit(&Event::Metadata {
        key: "total_chars".to_string(),
        value: prepared.total_chars.to_string(),
    });
    emitter.emit(&Event::Metadata {
        key: "chapter_count".to_string(),
        value: prepared.chapter_starts.len().to_string(),
    });

    let total_chunks = prepared.chunks.len();
    let use_checkpoint = request.use_checkpoint();

    // Resume decision: an incompatible checkpoint is reported by reason and
    // then ignored; the run starts fresh over it.
    let mut state: Option<CheckpointState> = None;
    if use_checkpoint && request.resume {
        if let Some(existing) = prepared.store.load_state()? {
            match CheckpointStore::verify(&existing, &prepared.fingerprint, total_chunks) {
                Ok(()) => {
                    emitter.emit(&Event::Checkpoint {
                        code: CheckpointCode::Resuming {
                            completed: existing.completed_chunks.len(),
                        },
                    });
                    state = Some(existing);
                }
                Err(reason) => {
                    emitter.emit(&Event::Checkpoint {
                        code: CheckpointCode::Invalid { reason },
                    });
                }
            }
        }
    }
    if use_checkpoint && state.is_none() {
        state = Some(CheckpointState {
            fingerprint: prepared.fingerprint.clone(),
            total_chunks,
            completed_chunks: Default::default(),
            chapter_starts: prepared.chapter_starts.clone(),
        });
    }
    if let Some(state) = &state {
        prepared.store.save_state(state)?;
    }

    let backend = create_backend(&prepared.profile, &request.split_pattern)?;
    let sample_rate = backend.sample_rate();
    let settings = ExportSettings {
        bitrate: request.bitrate.clone(),
        normalize: request.normalize,
        sample_rate,
    };

    if let Some(parent) = request.output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let use_stream = request.format == OutputFormat::Mp3 && !use_checkpoint;
    let mut sink = if use_stream {
        Sink::Stream(Mp3Stream::open(&request.output, &settings)?)
    } else {
        Sink::Spool(PcmSpool::new()?)
    };

    emitter.info(format!(
        "Processing {total_chunks} chunks with {} backend ({} pipeline + {})",
        backend.name(),
        prepared.profile.pipeline_mode,
        if use_stream {
            "streaming MP3 export"
        } else {
            "disk spooling"
        }
    ));
    emitter.emit(&Event::Phase {
        phase: Phase::Inference,
    });

    let run_result = match prepared.profile.pipeline_mode {
        PipelineMode::Overlap3 => {
            run_overlap(backend, &prepared.chunks, sink.as_chunk_sink(), emitter)?
        }
        PipelineMode::Sequential => {
            let checkpoint = match state.as_mut() {
                Some(state) => Some((&prepared.store, state)),
                None => None,
            };
            run_sequential(
                backend.as_ref(),
                &prepared.chunks,
                sink.as_chunk_sink(),
                emitter,
                checkpoint,
            )?
        }
    };

    emitter.emit(&Event::Phase {
        phase: Phase::Concatenating,
    });
    emitter.info("Concatenating audio segments...");
    let chapters = if request.format == OutputFormat::M4b {
        build_chapters(
            &prepared.chapter_starts,
            &run_result.chunk_sample_offsets,
            run_result.total_samples,
        )
    } else {
        Vec::new()
    };

    emitter.emit(&Event::Phase {
        phase: Phase::Exporting,
    });
    match (sink, request.format) {
        (Sink::Stream(stream), _) => stream.close()?,
        (Sink::Spool(spool), OutputFormat::M4b) => {
            spool.export_m4b(&request.output, &prepared.metadata, &chapters, &settings)?
        }
        (Sink::Spool(spool), OutputFormat::Mp3) => {
            spool.export_mp3(&request.output, &settings)?
        }
    }

    if use_checkpoint {
        prepared.store.cleanup()?;
        emitter.emit(&Event::Checkpoint {
            code: CheckpointCode::Cleaned,
        });
    }

    let avg_ms = run_result.chunk_times_ms.iter().sum::<u64>()
        / run_result.chunk_times_ms.len().max(1) as u64;
    emitter.emit(&Event::Done {
        output: Some(request.output.display().to_string()),
        chunks: Some(total_chunks),
    });
    emitter.info("Done.");
    emitter.info(format!("Output: {}", request.output.display()));
    emitter.info(format!("Chunks: {total_chunks}"));
    emitter.info(format!("Average chunk time: {:.2}s", avg_ms as f64 / 1000.0));

    Ok(JobSummary {
        output: request.output.clone(),
        total_chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventFormat;
    use std::io::Write;

    fn book_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn request(input: &std::path::Path, output: PathBuf) -> JobRequest {
        JobRequest {
            input: input.to_path_buf(),
            output,
            voice: defaults::DEFAULT_VOICE.to_string(),
            speed: 1.0,
            lang: defaults::DEFAULT_LANG.to_string(),
            backend: "mock".to_string(),
            accel: AccelChoice::Auto,
            workers: 1,
            pipeline_mode: None,
            chunk_chars: None,
            split_pattern: defaults::DEFAULT_SPLIT_PATTERN.to_string(),
            format: OutputFormat::Mp3,
            bitrate: defaults::DEFAULT_BITRATE.to_string(),
            normalize: false,
            checkpoint: false,
            resume: false,
            overrides: MetadataOverrides::default(),
        }
    }

    #[test]
    fn prepare_resolves_chunk_size_per_backend() {
        let book = book_file("# One\nSome chapter text here.\n");
        let dir = tempfile::tempdir().unwrap();
        let req = request(book.path(), dir.path().join("out.mp3"));
        let prepared = prepare_job(&req, None).unwrap();
        assert_eq!(prepared.profile.chunk_chars, defaults::TORCH_CHUNK_CHARS);
        assert_eq!(prepared.chunks.len(), 1);
        assert_eq!(prepared.chapter_starts, vec![(0, "One".to_string())]);
    }

    #[test]
    fn explicit_chunk_chars_wins_over_backend_default() {
        let book = book_file("# One\nSome chapter text here.\n");
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(book.path(), dir.path().join("out.mp3"));
        req.chunk_chars = Some(333);
        assert_eq!(prepare_job(&req, None).unwrap().profile.chunk_chars, 333);
    }

    #[test]
    fn invalid_speed_is_a_config_error() {
        let book = book_file("# One\ntext\n");
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(book.path(), dir.path().join("out.mp3"));
        req.speed = 0.0;
        let err = prepare_job(&req, None).unwrap_err();
        assert!(matches!(err, BookvoxError::ConfigInvalidValue { ref key, .. } if key == "speed"));
    }

    #[test]
    fn unknown_bitrate_is_a_config_error() {
        let book = book_file("# One\ntext\n");
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(book.path(), dir.path().join("out.mp3"));
        req.bitrate = "64k".to_string();
        let err = prepare_job(&req, None).unwrap_err();
        assert!(
            matches!(err, BookvoxError::ConfigInvalidValue { ref key, .. } if key == "bitrate")
        );
    }

    #[test]
    fn fingerprint_config_formats_speed_to_three_decimals() {
        let book = book_file("# One\ntext body\n");
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(book.path(), dir.path().join("out.mp3"));
        req.speed = 1.0;
        let a = prepare_job(&req, None).unwrap().fingerprint;
        req.speed = 1.0000004;
        let b = prepare_job(&req, None).unwrap().fingerprint;
        // Float noise below the third decimal must not change the fingerprint.
        assert_eq!(a, b);

        req.speed = 1.25;
        let c = prepare_job(&req, None).unwrap().fingerprint;
        assert_ne!(a, c);
    }

    #[test]
    fn overrides_ignored_for_mp3_output() {
        let book = book_file("# One\ntext body\n");
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(book.path(), dir.path().join("out.mp3"));
        req.overrides.title = Some("Overridden".to_string());
        let prepared = prepare_job(&req, None).unwrap();
        assert_ne!(prepared.metadata.title, "Overridden");

        req.format = OutputFormat::M4b;
        req.output = dir.path().join("out.m4b");
        let prepared = prepare_job(&req, None).unwrap();
        assert_eq!(prepared.metadata.title, "Overridden");
    }

    #[test]
    fn inspect_reports_counts_and_absent_checkpoint() {
        let book = book_file("# One\nfirst chapter.\n# Two\nsecond chapter.\n");
        let dir = tempfile::tempdir().unwrap();
        let req = request(book.path(), dir.path().join("out.mp3"));
        let inspection = inspect_job(&req).unwrap();
        assert_eq!(inspection.resolved_backend, "mock");
        assert_eq!(inspection.chapter_count, 2);
        assert!(inspection.total_chunks >= 1);
        assert!(!inspection.checkpoint.exists);
        assert!(inspection.errors.is_empty());

        // Inspection payloads must roundtrip through the wire format.
        let json = serde_json::to_string(&inspection).unwrap();
        let back: JobInspection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inspection);
    }

    #[test]
    fn inspect_is_read_only_and_repeatable() {
        let book = book_file("# One\nstable text.\n");
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp3");
        let req = request(book.path(), output.clone());

        let prepared = prepare_job(&req, None).unwrap();
        let store = CheckpointStore::for_output(&output);
        store
            .save_state(&CheckpointState {
                fingerprint: prepared.fingerprint.clone(),
                total_chunks: 4,
                completed_chunks: [0, 1].into_iter().collect(),
                chapter_starts: vec![(0, "One".to_string())],
            })
            .unwrap();
        let state_file = store.dir().join("state.json");
        let state_before = std::fs::read(&state_file).unwrap();

        let first = inspect_job(&req).unwrap();
        let second = inspect_job(&req).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.checkpoint.completed_chunks, 2);
        assert_eq!(std::fs::read(&state_file).unwrap(), state_before);
    }

    #[test]
    fn check_checkpoint_reports_none_found_and_hash_mismatch() {
        let book = book_file("# One\nstable text.\n");
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp3");
        let req = request(book.path(), output.clone());

        let probe = |req: &JobRequest| -> Vec<String> {
            let (emitter, rx) = EventEmitter::new(EventFormat::Text);
            check_checkpoint(req, &emitter).unwrap();
            drop(emitter);
            rx.try_iter().collect()
        };
        assert_eq!(probe(&req), vec!["CHECKPOINT:NONE"]);

        // Plant a compatible checkpoint.
        let prepared = prepare_job(&req, None).unwrap();
        let store = CheckpointStore::for_output(&output);
        store
            .save_state(&CheckpointState {
                fingerprint: prepared.fingerprint.clone(),
                total_chunks: 5,
                completed_chunks: [0, 1, 2].into_iter().collect(),
                chapter_starts: vec![(0, "One".to_string())],
            })
            .unwrap();
        assert_eq!(probe(&req), vec!["CHECKPOINT:FOUND:5:3"]);

        // Rewrite the source; the probe must flag the hash.
        std::fs::write(req.input.clone(), "# One\ndifferent text.\n").unwrap();
        assert_eq!(probe(&req), vec!["CHECKPOINT:INVALID:hash_mismatch"]);
    }

    #[test]
    fn extract_metadata_emits_three_keys() {
        let book = book_file("# One\ntext\n");
        let dir = tempfile::tempdir().unwrap();
        let req = request(book.path(), dir.path().join("out.mp3"));
        let (emitter, rx) = EventEmitter::new(EventFormat::Text);
        extract_metadata(&req, &emitter).unwrap();
        drop(emitter);
        let events: Vec<String> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(events[0].starts_with("METADATA:title:"));
        assert!(events[1].starts_with("METADATA:author:"));
        assert_eq!(events[2], "METADATA:has_cover:false");
    }
}
