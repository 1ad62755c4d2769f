//! Subprocess-backed synthesis runner.
//!
//! The real Kokoro backends live in external runner executables: text goes
//! in on stdin, raw s16le mono PCM comes back on stdout. One runner process
//! per chunk keeps the native runtime's memory growth bounded, which
//! matters on the constrained hardware this tool targets.

use super::SpeechBackend;
use crate::defaults;
use crate::error::{BookvoxError, Result};
use crate::profile::ExecutionProfile;
use crate::runtime::find_in_path;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

#[derive(Debug)]
pub struct ProcessBackend {
    runner: PathBuf,
    name: String,
    voice: String,
    speed: f64,
    lang: String,
    accel: bool,
    split_pattern: String,
}

impl ProcessBackend {
    /// Locate the runner executable and capture the synthesis knobs.
    ///
    /// A missing runner is a backend-init error, not a synthesis error:
    /// it is reported before the pipeline starts.
    pub fn new(
        runner_name: &str,
        profile: &ExecutionProfile,
        split_pattern: &str,
    ) -> Result<Self> {
        let runner = find_in_path(runner_name).ok_or_else(|| BookvoxError::BackendInit {
            backend: profile.backend.to_string(),
            message: format!("runner '{runner_name}' not found on PATH"),
        })?;
        Ok(Self {
            runner,
            name: profile.backend.to_string(),
            voice: profile.voice.clone(),
            speed: profile.speed,
            lang: profile.lang.clone(),
            accel: profile.accel,
            split_pattern: split_pattern.to_string(),
        })
    }

    fn run_chunk(&self, text: &str) -> std::io::Result<(std::process::ExitStatus, Vec<u8>, Vec<u8>)> {
        let mut cmd = Command::new(&self.runner);
        cmd.arg("--voice")
            .arg(&self.voice)
            .arg("--speed")
            .arg(format!("{:.3}", self.speed))
            .arg("--lang")
            .arg(&self.lang)
            .arg("--split-pattern")
            .arg(&self.split_pattern)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !self.accel {
            cmd.arg("--no-accel");
        }

        let mut child = cmd.spawn()?;
        // Chunk text is small (hundreds of bytes), so writing before
        // draining stdout cannot fill the pipe and deadlock.
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(text.as_bytes())?;
        }
        drop(child.stdin.take());

        let output = child.wait_with_output()?;
        Ok((output.status, output.stdout, output.stderr))
    }
}

impl SpeechBackend for ProcessBackend {
    fn synthesize(&self, text: &str) -> Result<Vec<i16>> {
        let (status, stdout, stderr) = self.run_chunk(text).map_err(|e| BookvoxError::Synthesis {
            chunk: 0,
            message: format!("failed to spawn runner: {e}"),
        })?;

        if !status.success() {
            let stderr_text = String::from_utf8_lossy(&stderr);
            return Err(BookvoxError::Synthesis {
                chunk: 0,
                message: format!(
                    "runner exited with {status}: {}",
                    stderr_text.trim().lines().last().unwrap_or("")
                ),
            });
        }

        // s16le mono; a trailing odd byte means a truncated stream.
        if stdout.len() % 2 != 0 {
            return Err(BookvoxError::Synthesis {
                chunk: 0,
                message: "runner produced a truncated PCM stream".to_string(),
            });
        }

        Ok(stdout
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn sample_rate(&self) -> u32 {
        defaults::SAMPLE_RATE
    }

    fn name(&self) -> &str {
        &self.name
    }
}
