//! Controller-side job execution.
//!
//! Each job runs in a separate worker process (this same binary, invoked
//! with the hidden `worker` subcommand) so a native-runtime crash takes
//! down one job, not the whole batch. The controller decodes the worker's
//! stdout incrementally through the event parser and keeps a bounded tail
//! of stderr for failure classification.

use crate::defaults;
use crate::error::{BookvoxError, Result};
use crate::events::parser::{EventParser, ParserState};
use crate::events::wire::Event;
use crate::job::{JobInspection, JobRequest};
use crate::runtime::AccelChoice;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    Failed { code: i32 },
    Signaled { signal: i32 },
}

impl ExitKind {
    pub fn is_success(self) -> bool {
        self == ExitKind::Success
    }

    pub fn describe(self) -> String {
        match self {
            ExitKind::Success => "exited cleanly".to_string(),
            ExitKind::Failed { code } => format!("exited with code {code}"),
            ExitKind::Signaled { signal } => {
                format!("terminated by signal {signal} ({})", signal_name(signal))
            }
        }
    }
}

fn signal_name(signal: i32) -> &'static str {
    match signal {
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGTERM => "SIGTERM",
        libc::SIGINT => "SIGINT",
        _ => "unknown",
    }
}

#[cfg(unix)]
fn exit_kind(status: std::process::ExitStatus) -> ExitKind {
    use std::os::unix::process::ExitStatusExt;
    if status.success() {
        ExitKind::Success
    } else if let Some(signal) = status.signal() {
        ExitKind::Signaled { signal }
    } else {
        ExitKind::Failed {
            code: status.code().unwrap_or(-1),
        }
    }
}

#[cfg(not(unix))]
fn exit_kind(status: std::process::ExitStatus) -> ExitKind {
    if status.success() {
        ExitKind::Success
    } else {
        ExitKind::Failed {
            code: status.code().unwrap_or(-1),
        }
    }
}

/// Everything observed from one worker run.
#[derive(Debug)]
pub struct JobOutcome {
    pub exit: ExitKind,
    pub state: ParserState,
    pub stderr_tail: Vec<String>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit.is_success() && self.state.done
    }

    /// Best available failure description: the worker's own error report,
    /// then the stderr tail, then the raw exit status.
    pub fn failure_message(&self) -> String {
        if let Some(error) = self.state.errors.last() {
            return error.clone();
        }
        if let Some(line) = self.stderr_tail.iter().rev().find(|l| !l.trim().is_empty()) {
            return format!("{} ({})", line.trim(), self.exit.describe());
        }
        self.exit.describe()
    }
}

/// Seam between job planning and job execution, so batch and recovery
/// logic can be tested without spawning processes.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run the planning-only inspection for one job.
    async fn inspect(&self, request: &JobRequest) -> Result<JobInspection>;

    /// Run one job to completion, invoking `on_event` for every decoded
    /// progress event. The callback type is spelled with an explicit
    /// higher-ranked lifetime: `async_trait` names the elided lifetimes,
    /// and a named callback lifetime would not unify with the inherent
    /// `run_worker` signature.
    async fn execute(
        &self,
        request: &JobRequest,
        on_event: &(dyn for<'a> Fn(&'a Event) + Send + Sync),
    ) -> Result<JobOutcome>;
}

/// Executor backed by worker subprocesses of the current binary.
pub struct WorkerExecutor {
    binary: PathBuf,
}

impl WorkerExecutor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            binary: std::env::current_exe()?,
        })
    }

    /// For tests: point at an explicit worker binary.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    fn worker_args(request: &JobRequest) -> Vec<String> {
        let mut args = vec![
            "worker".to_string(),
            "--input".to_string(),
            request.input.display().to_string(),
            "--output".to_string(),
            request.output.display().to_string(),
            "--voice".to_string(),
            request.voice.clone(),
            "--speed".to_string(),
            request.speed.to_string(),
            "--lang".to_string(),
            request.lang.clone(),
            "--backend".to_string(),
            request.backend.clone(),
            "--accel".to_string(),
            match request.accel {
                AccelChoice::Auto => "auto".to_string(),
                AccelChoice::On => "on".to_string(),
                AccelChoice::Off => "off".to_string(),
            },
            "--workers".to_string(),
            request.workers.to_string(),
            "--split-pattern".to_string(),
            request.split_pattern.clone(),
            "--format".to_string(),
            request.format.to_string(),
            "--bitrate".to_string(),
            request.bitrate.clone(),
        ];
        if let Some(mode) = request.pipeline_mode {
            args.push("--pipeline-mode".to_string());
            args.push(mode.to_string());
        }
        if let Some(chunk_chars) = request.chunk_chars {
            args.push("--chunk-chars".to_string());
            args.push(chunk_chars.to_string());
        }
        if request.normalize {
            args.push("--normalize".to_string());
        }
        if request.checkpoint {
            args.push("--checkpoint".to_string());
        }
        if request.resume {
            args.push("--resume".to_string());
        }
        if let Some(title) = &request.overrides.title {
            args.push("--title".to_string());
            args.push(title.clone());
        }
        if let Some(author) = &request.overrides.author {
            args.push("--author".to_string());
            args.push(author.clone());
        }
        if let Some(cover) = &request.overrides.cover {
            args.push("--cover".to_string());
            args.push(cover.display().to_string());
        }
        // The controller always reads JSON frames; the legacy encoding is
        // for humans running the worker by hand.
        args.push("--event-format".to_string());
        args.push("json".to_string());
        args
    }

    async fn run_worker(
        &self,
        mut args: Vec<String>,
        extra: &[&str],
        on_event: &(dyn for<'a> Fn(&'a Event) + Send + Sync),
    ) -> Result<JobOutcome> {
        args.extend(extra.iter().map(|s| s.to_string()));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BookvoxError::Worker {
                message: format!("failed to spawn worker: {e}"),
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| BookvoxError::Worker {
            message: "worker stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| BookvoxError::Worker {
            message: "worker stderr was not captured".to_string(),
        })?;

        let stderr_task = tokio::spawn(async move {
            let mut tail: VecDeque<String> = VecDeque::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == defaults::STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>()
        });

        let mut parser = EventParser::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            for event in parser.push(&buf[..n]) {
                on_event(&event);
            }
        }
        for event in parser.finish() {
            on_event(&event);
        }

        let status = child.wait().await?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        Ok(JobOutcome {
            exit: exit_kind(status),
            state: parser.state().clone(),
            stderr_tail,
        })
    }
}

#[async_trait]
impl JobExecutor for WorkerExecutor {
    async fn inspect(&self, request: &JobRequest) -> Result<JobInspection> {
        let outcome = self
            .run_worker(Self::worker_args(request), &["--inspect-job"], &|_| {})
            .await?;
        match outcome.state.inspection.clone() {
            Some(inspection) => Ok(inspection),
            None => Err(BookvoxError::Worker {
                message: format!("inspection produced no result: {}", outcome.failure_message()),
            }),
        }
    }

    async fn execute(
        &self,
        request: &JobRequest,
        on_event: &(dyn for<'a> Fn(&'a Event) + Send + Sync),
    ) -> Result<JobOutcome> {
        self.run_worker(Self::worker_args(request), &[], on_event)
            .await
    }
}
