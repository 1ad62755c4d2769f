//! Crash classification and the one-retry recovery policy.
//!
//! A worker that dies from resource exhaustion (native OOM, Metal/MPS
//! faults, hard signals) gets exactly one retry with the safest reachable
//! execution profile. Input and configuration errors are never retried:
//! they would fail identically, and the retry would just double the wait.

use crate::defaults;
use crate::error::Result;
use crate::events::wire::RecoveryNotice;
use crate::exec::{ExitKind, JobOutcome};
use crate::job::JobRequest;
use crate::profile::ExecutionProfile;
use crate::runtime::{
    AccelChoice, default_chunk_chars, resolve_accel, resolve_backend, resolve_pipeline_mode,
};

/// Markers that identify a failure as fatal regardless of how the process
/// died. Checked first: a crash message that names a missing input wins
/// over the signal that delivered it.
const NON_RECOVERABLE_MARKERS: &[&str] = &[
    "input file not found",
    "no such file or directory",
    "permission denied",
    "ffmpeg not found",
    "invalid configuration",
    "failed to parse input",
    "no text chunks produced",
    "cover override file not found",
    "unsupported version",
];

/// Markers in stderr or error events that indicate resource exhaustion or
/// a native-runtime fault.
const RECOVERABLE_MARKERS: &[&str] = &[
    "out of memory",
    "oom",
    "cannot allocate memory",
    "metal",
    "mps backend",
    "segmentation fault",
    "bus error",
    "abort trap",
    "killed",
];

fn failure_text(outcome: &JobOutcome) -> String {
    let mut text = String::new();
    for error in &outcome.state.errors {
        text.push_str(&error.to_ascii_lowercase());
        text.push('\n');
    }
    for line in &outcome.stderr_tail {
        text.push_str(&line.to_ascii_lowercase());
        text.push('\n');
    }
    text
}

/// Whether a failed outcome looks like a transient resource crash.
pub fn is_recoverable(outcome: &JobOutcome) -> bool {
    if outcome.exit.is_success() {
        return false;
    }

    let text = failure_text(outcome);
    if NON_RECOVERABLE_MARKERS.iter().any(|m| text.contains(m)) {
        return false;
    }

    if let ExitKind::Signaled { signal } = outcome.exit
        && matches!(
            signal,
            libc::SIGKILL | libc::SIGSEGV | libc::SIGABRT | libc::SIGBUS
        )
    {
        return true;
    }

    RECOVERABLE_MARKERS.iter().any(|m| text.contains(m))
}

/// Resolve the execution profile a request would run with on this host.
///
/// The controller and its workers share a host, so re-running the same
/// resolution here matches what the worker actually did.
pub fn resolved_profile(request: &JobRequest) -> Result<ExecutionProfile> {
    let backend = resolve_backend(&request.backend).map_err(|message| {
        crate::error::BookvoxError::ConfigInvalidValue {
            key: "backend".to_string(),
            message,
        }
    })?;
    let (accel, _) = resolve_accel(request.accel, backend);
    let chunk_chars = request
        .chunk_chars
        .unwrap_or_else(|| default_chunk_chars(backend));
    let (pipeline_mode, _) =
        resolve_pipeline_mode(request.pipeline_mode, request.format, request.use_checkpoint());

    Ok(ExecutionProfile {
        voice: request.voice.clone(),
        speed: request.speed,
        lang: request.lang.clone(),
        backend,
        accel,
        workers: request.workers,
        pipeline_mode,
        chunk_chars,
    })
}

/// Retry-once policy over crashed jobs.
pub struct RecoveryController {
    max_attempts: u32,
}

impl RecoveryController {
    pub fn new() -> Self {
        Self {
            max_attempts: defaults::MAX_RECOVERY_ATTEMPTS,
        }
    }

    /// A controller that never grants retries (`--no-recovery`).
    pub fn disabled() -> Self {
        Self { max_attempts: 1 }
    }

    /// Decide whether a failed attempt earns a retry.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    /// Returns the downgraded request plus the notice to surface, or
    /// `None` when the job must stay failed: attempts exhausted, failure
    /// not recoverable, or the fallback would change nothing.
    pub fn plan_retry(
        &self,
        request: &JobRequest,
        attempt: u32,
        outcome: &JobOutcome,
    ) -> Result<Option<(JobRequest, RecoveryNotice)>> {
        if attempt >= self.max_attempts || !is_recoverable(outcome) {
            return Ok(None);
        }

        let current = resolved_profile(request)?;
        let fallback = current.fallback();
        if current.execution_equivalent(&fallback) {
            return Ok(None);
        }

        let mut retry = request.clone();
        retry.backend = fallback.backend.to_string();
        retry.accel = AccelChoice::Off;
        retry.workers = fallback.workers;
        retry.pipeline_mode = Some(fallback.pipeline_mode);
        retry.chunk_chars = Some(fallback.chunk_chars);

        let notice = RecoveryNotice {
            attempt: attempt + 1,
            max_attempts: self.max_attempts,
            reason: outcome.failure_message(),
            profile: fallback,
        };
        Ok(Some((retry, notice)))
    }
}

impl Default for RecoveryController {
    fn default() -> Self {
        Self::new()
    }
}
