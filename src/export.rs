//! Container export through ffmpeg.
//!
//! Two sink shapes exist. The streaming sink pipes s16le PCM straight into
//! a long-lived ffmpeg encode for MP3 output; the spool sink accumulates
//! PCM in a temp file and runs one final ffmpeg pass, which is the only
//! shape that can carry chapters, embedded metadata, and cover art.

use crate::error::{BookvoxError, Result};
use crate::runtime::find_in_path;
use crate::source::BookMetadata;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// Chapter timing in samples at the export sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterInfo {
    pub title: String,
    pub start_sample: u64,
    pub end_sample: u64,
}

/// Knobs shared by every export path.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub bitrate: String,
    pub normalize: bool,
    pub sample_rate: u32,
}

const LOUDNORM_FILTER: &str = "loudnorm=I=-14:TP=-1:LRA=11";

pub fn ffmpeg_path() -> Result<PathBuf> {
    find_in_path("ffmpeg").ok_or(BookvoxError::FfmpegMissing)
}

/// Build chapter timings from chapter start markers and per-chunk sample
/// offsets. Each chapter runs from its first chunk's offset to the next
/// chapter's start (or the end of the audio); empty titles get an ordinal
/// fallback.
pub fn build_chapters(
    chapter_starts: &[(usize, String)],
    chunk_sample_offsets: &[u64],
    total_samples: u64,
) -> Vec<ChapterInfo> {
    let mut chapters = Vec::with_capacity(chapter_starts.len());
    for (i, (chunk_index, title)) in chapter_starts.iter().enumerate() {
        let start_sample = chunk_sample_offsets
            .get(*chunk_index)
            .copied()
            .unwrap_or(total_samples);
        let end_sample = chapter_starts
            .get(i + 1)
            .and_then(|(next, _)| chunk_sample_offsets.get(*next).copied())
            .unwrap_or(total_samples);
        let title = if title.trim().is_empty() {
            format!("Chapter {}", i + 1)
        } else {
            title.clone()
        };
        chapters.push(ChapterInfo {
            title,
            start_sample,
            end_sample,
        });
    }
    chapters
}

fn escape_ffmetadata(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' | '=' | ';' | '#' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\\n"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render an ffmetadata document with title/artist/album tags and one
/// `[CHAPTER]` block per chapter, timebased at the export sample rate.
pub fn generate_ffmetadata(
    metadata: &BookMetadata,
    chapters: &[ChapterInfo],
    sample_rate: u32,
) -> String {
    let mut lines = vec![
        ";FFMETADATA1".to_string(),
        format!("title={}", escape_ffmetadata(&metadata.title)),
        format!("artist={}", escape_ffmetadata(&metadata.author)),
        format!("album={}", escape_ffmetadata(&metadata.title)),
    ];

    for chapter in chapters {
        lines.push(String::new());
        lines.push("[CHAPTER]".to_string());
        lines.push(format!("TIMEBASE=1/{sample_rate}"));
        lines.push(format!("START={}", chapter.start_sample));
        lines.push(format!("END={}", chapter.end_sample));
        lines.push(format!("title={}", escape_ffmetadata(&chapter.title)));
    }

    lines.join("\n")
}

fn cover_suffix(metadata: &BookMetadata) -> &'static str {
    match metadata.cover_mime_type.as_deref() {
        Some(mime) if mime.contains("png") => ".png",
        Some(mime) if mime.contains("gif") => ".gif",
        _ => ".jpg",
    }
}

fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

fn run_ffmpeg(mut cmd: Command) -> Result<()> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()?;
    if !output.status.success() {
        return Err(BookvoxError::FfmpegFailed {
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Streaming MP3 encode: one long-lived ffmpeg process consuming PCM on
/// stdin. Peak disk usage is just the growing MP3.
pub struct Mp3Stream {
    child: Child,
}

impl Mp3Stream {
    pub fn open(output: &Path, settings: &ExportSettings) -> Result<Self> {
        let ffmpeg = ffmpeg_path()?;
        let mut cmd = Command::new(ffmpeg);
        // Stderr is piped but only drained at close; keep the encoder quiet
        // so progress chatter cannot fill the pipe mid-stream.
        cmd.args(["-nostats", "-loglevel", "error"])
            .args(["-f", "s16le"])
            .args(["-ar", &settings.sample_rate.to_string()])
            .args(["-ac", "1"])
            .args(["-i", "pipe:0"]);
        if settings.normalize {
            cmd.args(["-af", LOUDNORM_FILTER]);
        }
        cmd.args(["-b:a", &settings.bitrate])
            .arg("-y")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd.spawn()?;
        Ok(Self { child })
    }

    pub fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        let stdin = self
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| BookvoxError::ExportStream {
                message: "encoder stdin already closed".to_string(),
            })?;
        stdin
            .write_all(&samples_to_bytes(samples))
            .map_err(|e| BookvoxError::ExportStream {
                message: e.to_string(),
            })
    }

    /// Close the PCM stream and wait for the encode to finish.
    pub fn close(mut self) -> Result<()> {
        drop(self.child.stdin.take());
        let mut stderr = String::new();
        if let Some(pipe) = self.child.stderr.as_mut() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        let status = self.child.wait()?;
        if !status.success() {
            return Err(BookvoxError::FfmpegFailed { stderr });
        }
        Ok(())
    }
}

/// Raw PCM spool on disk, the input to a final single-pass export.
pub struct PcmSpool {
    file: tempfile::NamedTempFile,
    samples_written: u64,
}

impl PcmSpool {
    pub fn new() -> Result<Self> {
        Ok(Self {
            file: tempfile::Builder::new().suffix(".pcm").tempfile()?,
            samples_written: 0,
        })
    }

    pub fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        self.file.write_all(&samples_to_bytes(samples))?;
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    fn audio_input_args(&self, cmd: &mut Command, sample_rate: u32) -> Result<()> {
        if self.samples_written == 0 {
            // Zero-length audio still needs a valid container: encode a
            // sliver of silence instead.
            cmd.args(["-f", "lavfi"])
                .args(["-t", "0.1"])
                .args(["-i", &format!("anullsrc=r={sample_rate}:cl=mono")]);
        } else {
            self.file.as_file().sync_all()?;
            cmd.args(["-f", "s16le"])
                .args(["-ar", &sample_rate.to_string()])
                .args(["-ac", "1"])
                .arg("-i")
                .arg(self.file.path());
        }
        Ok(())
    }

    /// Encode the spooled PCM to a plain MP3.
    pub fn export_mp3(self, output: &Path, settings: &ExportSettings) -> Result<()> {
        let mut cmd = Command::new(ffmpeg_path()?);
        self.audio_input_args(&mut cmd, settings.sample_rate)?;
        if settings.normalize && self.samples_written > 0 {
            cmd.args(["-af", LOUDNORM_FILTER]);
        }
        cmd.args(["-b:a", &settings.bitrate]).arg("-y").arg(output);
        run_ffmpeg(cmd)
    }

    /// Encode the spooled PCM to an M4B with chapters, embedded tags, and
    /// cover art when present.
    pub fn export_m4b(
        self,
        output: &Path,
        metadata: &BookMetadata,
        chapters: &[ChapterInfo],
        settings: &ExportSettings,
    ) -> Result<()> {
        let mut metadata_file = tempfile::Builder::new().suffix(".txt").tempfile()?;
        metadata_file
            .write_all(generate_ffmetadata(metadata, chapters, settings.sample_rate).as_bytes())?;
        metadata_file.flush()?;

        let cover_file = match &metadata.cover_image {
            Some(image) => {
                let mut file = tempfile::Builder::new()
                    .suffix(cover_suffix(metadata))
                    .tempfile()?;
                file.write_all(image)?;
                file.flush()?;
                Some(file)
            }
            None => None,
        };

        let mut cmd = Command::new(ffmpeg_path()?);
        self.audio_input_args(&mut cmd, settings.sample_rate)?;
        cmd.arg("-i").arg(metadata_file.path());
        if let Some(cover) = &cover_file {
            cmd.arg("-i").arg(cover.path());
        }
        cmd.args(["-map", "0:a"]).args(["-map_metadata", "1"]);
        if cover_file.is_some() {
            cmd.args(["-map", "2:v"])
                .args(["-c:v", "copy"])
                .args(["-disposition:v:0", "attached_pic"]);
        }
        if settings.normalize && self.samples_written > 0 {
            cmd.args(["-af", LOUDNORM_FILTER]);
        }
        cmd.args(["-c:a", "aac"])
            .args(["-b:a", &settings.bitrate])
            .args(["-movflags", "+faststart"])
            .arg("-y")
            .arg(output);
        run_ffmpeg(cmd)
    }
}
