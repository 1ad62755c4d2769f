//! Multi-book planning and the sequential batch scheduler.
//!
//! Planning is read-only: it resolves output paths, runs the worker-side
//! inspection per job, and decides what to do with any existing
//! checkpoints. Output collisions block every involved job, not just the
//! later one, so the survivor cannot silently clobber a sibling's file.
//! One job's planning failure never blocks the rest of the batch.

use crate::error::{BookvoxError, Result};
use crate::events::wire::Event;
use crate::exec::JobExecutor;
use crate::job::{JobInspection, JobRequest};
use crate::recovery::RecoveryController;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What the planner decided about one job's checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointAction {
    /// No usable checkpoint involvement; run from scratch.
    Ignore,
    /// Compatible checkpoint found; resume with this many chunks done.
    Resume { completed: usize, total: usize },
    /// A checkpoint exists but cannot seed this run; it will be replaced.
    StartFresh { reason: String },
}

/// One planned job.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub request: JobRequest,
    pub inspection: Option<JobInspection>,
    pub checkpoint: CheckpointAction,
    /// Why this job cannot run, when planning rejected it.
    pub blocked: Option<String>,
}

impl JobPlan {
    pub fn runnable(&self) -> bool {
        self.blocked.is_none()
    }
}

/// A planned batch, in input order.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub jobs: Vec<JobPlan>,
}

impl BatchPlan {
    pub fn runnable_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.runnable()).count()
    }

    /// Demote every planned resume to a fresh start, for a caller that
    /// wants to regenerate everything.
    pub fn start_fresh_everywhere(&mut self) {
        for job in &mut self.jobs {
            if let CheckpointAction::Resume { .. } = job.checkpoint {
                job.checkpoint = CheckpointAction::StartFresh {
                    reason: "regeneration requested".to_string(),
                };
                job.request.resume = false;
            }
        }
    }
}

/// Resolve the output path for one input.
///
/// A single input with an explicit file output uses it verbatim; otherwise
/// outputs land next to their input (or under the given directory) named
/// by input stem and format extension.
pub fn resolve_output_path(
    input: &Path,
    output: Option<&Path>,
    extension: &str,
    single_input: bool,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "book".into());
    let named = |dir: &Path| {
        let mut name = stem.clone();
        name.push(".");
        name.push(extension);
        dir.join(name)
    };

    match output {
        Some(path) if single_input && !path.is_dir() => path.to_path_buf(),
        Some(dir) => named(dir),
        None => named(input.parent().unwrap_or_else(|| Path::new("."))),
    }
}

fn checkpoint_action(request: &JobRequest, inspection: &JobInspection) -> CheckpointAction {
    let cp = &inspection.checkpoint;
    if !cp.exists || !request.use_checkpoint() {
        return CheckpointAction::Ignore;
    }
    if cp.resume_compatible && request.resume && cp.completed_chunks >= 1 {
        CheckpointAction::Resume {
            completed: cp.completed_chunks,
            total: cp.total_chunks,
        }
    } else if cp.resume_compatible && request.resume {
        // An interrupt before the first chunk completes leaves a compatible
        // checkpoint with nothing in it. There is nothing to resume.
        CheckpointAction::StartFresh {
            reason: "no completed chunks".to_string(),
        }
    } else if cp.resume_compatible {
        CheckpointAction::StartFresh {
            reason: "resume not requested".to_string(),
        }
    } else {
        CheckpointAction::StartFresh {
            reason: cp
                .reason
                .clone()
                .unwrap_or_else(|| "incompatible".to_string()),
        }
    }
}

/// Plan a batch: resolve outputs, inspect every job, detect collisions.
///
/// `template` carries the shared knobs; its input/output fields are
/// ignored in favor of the per-input resolution.
pub async fn plan_batch(
    executor: &dyn JobExecutor,
    inputs: &[PathBuf],
    output: Option<&Path>,
    template: &JobRequest,
) -> Result<BatchPlan> {
    if inputs.is_empty() {
        return Err(BookvoxError::ConfigInvalidValue {
            key: "input".to_string(),
            message: "at least one input file is required".to_string(),
        });
    }
    let single = inputs.len() == 1;
    // Metadata overrides only make sense for one book going to a container
    // that carries metadata. Everywhere else they are stripped at planning
    // time so one book's overrides never leak onto another.
    let keep_overrides = single && template.format.supports_metadata();
    let mut jobs: Vec<JobPlan> = inputs
        .iter()
        .map(|input| {
            let mut request = template.clone();
            if !keep_overrides {
                request.overrides = Default::default();
            }
            request.input = input.clone();
            request.output =
                resolve_output_path(input, output, template.format.extension(), single);
            JobPlan {
                request,
                inspection: None,
                checkpoint: CheckpointAction::Ignore,
                blocked: None,
            }
        })
        .collect();

    // Collision symmetry: every job sharing an output path is blocked.
    let mut by_output: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
    for (idx, job) in jobs.iter().enumerate() {
        by_output.entry(job.request.output.clone()).or_default().push(idx);
    }
    for (path, indices) in &by_output {
        if indices.len() > 1 {
            for &idx in indices {
                jobs[idx].blocked = Some(format!(
                    "output path collision: {} inputs resolve to {}",
                    indices.len(),
                    path.display()
                ));
            }
        }
    }

    // Inspect the survivors; a failed inspection blocks only its own job.
    for job in &mut jobs {
        if job.blocked.is_some() {
            continue;
        }
        match executor.inspect(&job.request).await {
            Ok(inspection) => {
                job.checkpoint = checkpoint_action(&job.request, &inspection);
                job.inspection = Some(inspection);
            }
            Err(e) => {
                job.blocked = Some(e.to_string());
            }
        }
    }

    Ok(BatchPlan { jobs })
}

/// Outcome of one job in a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub input: PathBuf,
    pub output: PathBuf,
    pub success: bool,
    pub recovered: bool,
    pub message: Option<String>,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub results: Vec<JobResult>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

/// Run a planned batch one job at a time, applying the recovery policy.
///
/// `on_event` receives every worker event tagged with the job's index in
/// the plan. Failures are isolated: the scheduler always moves on to the
/// next job.
pub async fn run_batch(
    executor: &dyn JobExecutor,
    plan: &BatchPlan,
    recovery: &RecoveryController,
    on_event: &(dyn Fn(usize, &Event) + Send + Sync),
) -> BatchReport {
    let mut results = Vec::with_capacity(plan.jobs.len());

    for (idx, job) in plan.jobs.iter().enumerate() {
        if let Some(reason) = &job.blocked {
            results.push(JobResult {
                input: job.request.input.clone(),
                output: job.request.output.clone(),
                success: false,
                recovered: false,
                message: Some(reason.clone()),
            });
            continue;
        }

        let forward = |event: &Event| on_event(idx, event);
        let mut request = job.request.clone();
        let mut attempt: u32 = 1;
        let mut recovered = false;

        let result = loop {
            let outcome = match executor.execute(&request, &forward).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    break JobResult {
                        input: job.request.input.clone(),
                        output: request.output.clone(),
                        success: false,
                        recovered,
                        message: Some(e.to_string()),
                    };
                }
            };

            if outcome.succeeded() {
                break JobResult {
                    input: job.request.input.clone(),
                    output: request.output.clone(),
                    success: true,
                    recovered,
                    message: None,
                };
            }

            match recovery.plan_retry(&request, attempt, &outcome) {
                Ok(Some((retry, notice))) => {
                    on_event(
                        idx,
                        &Event::Recovery {
                            notice: notice.clone(),
                        },
                    );
                    request = retry;
                    attempt = notice.attempt;
                    recovered = true;
                }
                _ => {
                    break JobResult {
                        input: job.request.input.clone(),
                        output: request.output.clone(),
                        success: false,
                        recovered: false,
                        message: Some(outcome.failure_message()),
                    };
                }
            }
        };
        results.push(result);
    }

    BatchReport { results }
}
