use anyhow::Result;
use bookvox::batch::{self, BatchPlan, CheckpointAction};
use bookvox::cli::{Cli, Commands, RunArgs, WorkerArgs};
use bookvox::config::Config;
use bookvox::events::{Event, EventEmitter, EventFormat, LogLevel, spawn_writer};
use bookvox::exec::WorkerExecutor;
use bookvox::job;
use bookvox::recovery::RecoveryController;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = load_config(cli.config.as_deref())?;
            let ok = run_command(args, &config, cli.quiet).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Worker(args) => {
            let ok = worker_command(&args);
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config = match explicit {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    Ok(config.with_env_overrides())
}

async fn run_command(args: RunArgs, config: &Config, quiet: bool) -> Result<bool> {
    // Machine consumers get a clean event stream on stdout.
    let machine = args.event_format;
    let quiet = quiet || machine.is_some();
    let recovery = if args.no_recovery {
        RecoveryController::disabled()
    } else {
        RecoveryController::new()
    };

    let template = args.to_template(config);
    let executor = WorkerExecutor::new()?;

    let mut plan =
        batch::plan_batch(&executor, &args.inputs, args.output.as_deref(), &template).await?;
    if args.fresh {
        plan.start_fresh_everywhere();
    }

    if args.plan_only {
        print_plan(&plan);
        return Ok(plan.runnable_count() == plan.jobs.len());
    }

    let total = plan.jobs.len();
    let mut all_ok = true;

    for (idx, job) in plan.jobs.iter().enumerate() {
        if let Some(reason) = &job.blocked {
            eprintln!(
                "{} [{}/{}] {}: {}",
                "blocked".red().bold(),
                idx + 1,
                total,
                job.request.input.display(),
                reason
            );
            all_ok = false;
            continue;
        }

        if !quiet {
            println!(
                "{} [{}/{}] {} {} {}",
                "job".bold(),
                idx + 1,
                total,
                job.request.input.display(),
                "→".dimmed(),
                job.request.output.display()
            );
            if let CheckpointAction::Resume { completed, total } = &job.checkpoint {
                println!(
                    "  {} resuming from checkpoint ({completed}/{total} chunks done)",
                    "·".dimmed()
                );
            }
        }

        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::no_length();
            bar.set_style(
                ProgressStyle::with_template(
                    "  {bar:30.cyan/blue} {pos}/{len} chunks {elapsed} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        };

        let single = BatchPlan {
            jobs: vec![job.clone()],
        };
        let bar_ref = &bar;
        let report = batch::run_batch(&executor, &single, &recovery, &move |_, event| {
            match machine {
                Some(format) => print_frame(format, event),
                None => handle_event(bar_ref, event),
            }
        })
        .await;
        bar.finish_and_clear();

        let result = &report.results[0];
        if result.success {
            if !quiet {
                let note = if result.recovered {
                    " (after recovery retry)"
                } else {
                    ""
                };
                println!(
                    "  {} {}{note}",
                    "done".green().bold(),
                    result.output.display()
                );
            }
        } else {
            all_ok = false;
            eprintln!(
                "{} [{}/{}] {}: {}",
                "failed".red().bold(),
                idx + 1,
                total,
                result.input.display(),
                result.message.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(all_ok)
}

fn print_frame(format: EventFormat, event: &Event) {
    match format {
        EventFormat::Text => println!("{}", event.to_legacy()),
        EventFormat::Json => {
            if let Ok(json) = event.to_json() {
                println!("{json}");
            }
        }
    }
}

fn handle_event(bar: &ProgressBar, event: &Event) {
    match event {
        Event::Phase { phase } => bar.set_message(phase.to_string()),
        Event::Progress {
            current_chunk,
            total_chunks,
        } => {
            if bar.length().is_none() {
                bar.set_length(*total_chunks as u64);
            }
            bar.set_position(*current_chunk as u64);
        }
        Event::Checkpoint { code } => {
            bar.set_message(format!("checkpoint: {code:?}"));
        }
        Event::Recovery { notice } => {
            bar.suspend(|| {
                eprintln!(
                    "  {} attempt {}/{}: {} (retrying with {} backend)",
                    "recovery".yellow().bold(),
                    notice.attempt,
                    notice.max_attempts,
                    notice.reason,
                    notice.profile.backend
                );
            });
        }
        Event::Log {
            level: LogLevel::Warning,
            message,
        } => {
            bar.suspend(|| eprintln!("  {} {message}", "warning".yellow()));
        }
        Event::Error { message } => {
            bar.suspend(|| eprintln!("  {} {message}", "error".red()));
        }
        _ => {}
    }
}

fn print_plan(plan: &BatchPlan) {
    for (idx, job) in plan.jobs.iter().enumerate() {
        let status = match &job.blocked {
            Some(reason) => format!("{} ({reason})", "blocked".red()),
            None => match &job.checkpoint {
                CheckpointAction::Resume { completed, total } => {
                    format!("resume {completed}/{total} chunks")
                }
                CheckpointAction::StartFresh { reason } => format!("start fresh ({reason})"),
                CheckpointAction::Ignore => "run".to_string(),
            },
        };
        println!(
            "[{}/{}] {} → {} [{status}]",
            idx + 1,
            plan.jobs.len(),
            job.request.input.display(),
            job.request.output.display(),
        );
        if let Some(inspection) = &job.inspection {
            println!(
                "      {} chunks, {} chapters, backend {}",
                inspection.total_chunks, inspection.chapter_count, inspection.resolved_backend
            );
        }
    }
}

/// Worker-mode entry: everything on stdout is event frames; human-facing
/// output does not belong here.
fn worker_command(args: &WorkerArgs) -> bool {
    let (emitter, rx) = EventEmitter::new(args.event_format);
    let writer = spawn_writer(rx, std::io::stdout());
    let request = args.to_request();

    let result = if args.extract_metadata {
        job::extract_metadata(&request, &emitter)
    } else if args.check_checkpoint {
        job::check_checkpoint(&request, &emitter)
    } else if args.inspect_job {
        job::inspect_job(&request).map(|inspection| {
            emitter.emit(&Event::Inspection { result: inspection });
        })
    } else {
        job::run_job(&request, &emitter).map(|_| ())
    };

    let ok = match result {
        Ok(()) => true,
        Err(e) => {
            emitter.error(e.to_string());
            false
        }
    };

    drop(emitter);
    let _ = writer.join();
    ok
}
