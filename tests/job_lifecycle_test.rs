//! End-to-end job runs with the mock backend and a stand-in ffmpeg.
//!
//! A tiny shell script on PATH plays the encoder: it drains stdin and
//! creates the output file, which is all these tests need to exercise the
//! full parse → synthesize → export → checkpoint lifecycle.

use bookvox::checkpoint::{CheckpointState, CheckpointStore, InvalidReason};
use bookvox::defaults;
use bookvox::events::{CheckpointCode, Event, EventEmitter, EventFormat, Phase};
use bookvox::job::{JobRequest, prepare_job, run_job};
use bookvox::profile::OutputFormat;
use bookvox::runtime::AccelChoice;
use bookvox::source::MetadataOverrides;
use bookvox::synth::create_backend;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Once, OnceLock};

static SHIM_DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
static SHIM_PATH: Once = Once::new();

/// Prepend a fake `ffmpeg` to PATH. It drains stdin (the streaming sink
/// pipes PCM into it) and creates its last argument, the output file.
fn install_ffmpeg_shim() {
    SHIM_PATH.call_once(|| {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ffmpeg");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat >/dev/null\nfor arg in \"$@\"; do out=\"$arg\"; done\n: > \"$out\"\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let path = std::env::var_os("PATH").unwrap_or_default();
        let mut parts = vec![dir.path().to_path_buf()];
        parts.extend(std::env::split_paths(&path));
        let joined = std::env::join_paths(parts).unwrap();
        // Safety: called exactly once, before any test spawns threads that
        // read the environment concurrently with this write.
        unsafe {
            std::env::set_var("PATH", joined);
        }
        let _ = SHIM_DIR.set(dir);
    });
}

fn write_book(dir: &Path, paragraphs: usize) -> PathBuf {
    let mut text = String::new();
    for i in 0..paragraphs {
        text.push_str(&format!("# Chapter {}\n", i + 1));
        text.push_str(&format!("Paragraph body number {i} with enough words to synthesize.\n"));
    }
    let path = dir.join("book.txt");
    std::fs::write(&path, text).unwrap();
    path
}

fn request(input: PathBuf, output: PathBuf) -> JobRequest {
    JobRequest {
        input,
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

fn run_collecting(req: &JobRequest) -> (bookvox::job::JobSummary, Vec<Event>) {
    let (emitter, rx) = EventEmitter::new(EventFormat::Json);
    let summary = run_job(req, &emitter).unwrap();
    drop(emitter);
    let events = rx
        .try_iter()
        .map(|frame| Event::from_json(&frame).unwrap())
        .collect();
    (summary, events)
}

fn phases(events: &[Event]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Phase { phase } => Some(*phase),
            _ => None,
        })
        .collect()
}

fn checkpoint_codes(events: &[Event]) -> Vec<CheckpointCode> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Checkpoint { code } => Some(code.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn mp3_run_without_checkpoint_streams_and_leaves_no_state() {
    install_ffmpeg_shim();
    let dir = tempfile::tempdir().unwrap();
    let input = write_book(dir.path(), 3);
    let output = dir.path().join("book.mp3");
    let req = request(input, output.clone());

    let (summary, events) = run_collecting(&req);
    assert_eq!(summary.output, output);
    assert!(output.is_file());
    assert!(!CheckpointStore::for_output(&output).dir().exists());

    assert_eq!(
        phases(&events),
        vec![
            Phase::Parsing,
            Phase::Inference,
            Phase::Concatenating,
            Phase::Exporting,
        ]
    );
    assert!(checkpoint_codes(&events).is_empty());
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Done { chunks: Some(c), .. } if *c == summary.total_chunks
    )));
}

#[test]
fn checkpointed_run_saves_every_chunk_then_cleans_up() {
    install_ffmpeg_shim();
    let dir = tempfile::tempdir().unwrap();
    let input = write_book(dir.path(), 2);
    let output = dir.path().join("book.mp3");
    let mut req = request(input, output.clone());
    req.checkpoint = true;

    let (summary, events) = run_collecting(&req);
    assert!(output.is_file());
    assert!(!CheckpointStore::for_output(&output).dir().exists());

    let codes = checkpoint_codes(&events);
    let saved = codes
        .iter()
        .filter(|c| matches!(c, CheckpointCode::Saved { .. }))
        .count();
    assert_eq!(saved, summary.total_chunks);
    assert_eq!(codes.last(), Some(&CheckpointCode::Cleaned));
}

#[test]
fn resume_reuses_completed_chunks() {
    install_ffmpeg_shim();
    let dir = tempfile::tempdir().unwrap();
    let input = write_book(dir.path(), 4);
    let output = dir.path().join("book.mp3");
    let mut req = request(input, output.clone());
    req.resume = true;

    // Plant a partial checkpoint as an interrupted run would leave it:
    // chunk 0's audio on disk, then the state recording it complete.
    let prepared = prepare_job(&req, None).unwrap();
    assert!(prepared.chunks.len() >= 2);
    let backend = create_backend(&prepared.profile, &req.split_pattern).unwrap();
    let samples = backend.synthesize(&prepared.chunks[0].text).unwrap();
    prepared
        .store
        .save_chunk_audio(0, &samples, backend.sample_rate())
        .unwrap();
    prepared
        .store
        .save_state(&CheckpointState {
            fingerprint: prepared.fingerprint.clone(),
            total_chunks: prepared.chunks.len(),
            completed_chunks: [0].into_iter().collect(),
            chapter_starts: prepared.chapter_starts.clone(),
        })
        .unwrap();

    let (_, events) = run_collecting(&req);
    let codes = checkpoint_codes(&events);
    assert!(codes.contains(&CheckpointCode::Resuming { completed: 1 }));
    assert!(codes.contains(&CheckpointCode::Reused { chunk: 0 }));
    assert!(!codes.iter().any(|c| matches!(c, CheckpointCode::Saved { chunk: 0 })));
    assert!(output.is_file());
    assert!(!prepared.store.dir().exists());
}

#[test]
fn resume_rejects_a_checkpoint_from_different_settings() {
    install_ffmpeg_shim();
    let dir = tempfile::tempdir().unwrap();
    let input = write_book(dir.path(), 2);
    let output = dir.path().join("book.mp3");

    // Checkpoint written at speed 1.0.
    let planted = request(input.clone(), output.clone());
    let prepared = prepare_job(&planted, None).unwrap();
    prepared
        .store
        .save_state(&CheckpointState {
            fingerprint: prepared.fingerprint.clone(),
            total_chunks: prepared.chunks.len(),
            completed_chunks: [0].into_iter().collect(),
            chapter_starts: prepared.chapter_starts.clone(),
        })
        .unwrap();

    // Resumed at speed 1.25: the old audio would sound wrong.
    let mut req = request(input, output.clone());
    req.resume = true;
    req.speed = 1.25;

    let (summary, events) = run_collecting(&req);
    let codes = checkpoint_codes(&events);
    assert!(codes.contains(&CheckpointCode::Invalid {
        reason: InvalidReason::ConfigMismatch,
    }));
    assert!(!codes.iter().any(|c| matches!(c, CheckpointCode::Resuming { .. })));
    // The run starts fresh and regenerates everything.
    let saved = codes
        .iter()
        .filter(|c| matches!(c, CheckpointCode::Saved { .. }))
        .count();
    assert_eq!(saved, summary.total_chunks);
    assert!(output.is_file());
}

#[test]
fn orphaned_chunk_audio_is_demoted_and_regenerated() {
    install_ffmpeg_shim();
    let dir = tempfile::tempdir().unwrap();
    let input = write_book(dir.path(), 2);
    let output = dir.path().join("book.mp3");
    let mut req = request(input, output.clone());
    req.resume = true;

    // State claims chunk 0 complete but its audio record never landed.
    let prepared = prepare_job(&req, None).unwrap();
    prepared
        .store
        .save_state(&CheckpointState {
            fingerprint: prepared.fingerprint.clone(),
            total_chunks: prepared.chunks.len(),
            completed_chunks: [0].into_iter().collect(),
            chapter_starts: prepared.chapter_starts.clone(),
        })
        .unwrap();

    let (_, events) = run_collecting(&req);
    let codes = checkpoint_codes(&events);
    assert!(codes.contains(&CheckpointCode::MissingAudio { chunk: 0 }));
    assert!(codes.contains(&CheckpointCode::Saved { chunk: 0 }));
    assert!(output.is_file());
}

#[test]
fn m4b_export_runs_the_spool_path() {
    install_ffmpeg_shim();
    let dir = tempfile::tempdir().unwrap();
    let input = write_book(dir.path(), 2);
    let output = dir.path().join("book.m4b");
    let mut req = request(input, output.clone());
    req.format = OutputFormat::M4b;
    req.overrides.title = Some("Planted Title".to_string());

    let (summary, events) = run_collecting(&req);
    assert!(output.is_file());
    assert_eq!(summary.total_chunks, 2);
    assert!(events.iter().any(|e| matches!(e, Event::Done { .. })));
}
