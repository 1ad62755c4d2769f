//! Command-line interface for bookvox
//!
//! Provides argument parsing using clap derive macros. The `worker`
//! subcommand is the hidden per-job process surface spawned by the batch
//! scheduler; humans use `run`.

use crate::config::Config;
use crate::events::EventFormat;
use crate::job::JobRequest;
use crate::profile::{OutputFormat, PipelineMode};
use crate::runtime::AccelChoice;
use crate::source::MetadataOverrides;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Long-form text to audiobook, resumable
#[derive(Parser, Debug)]
#[command(name = "bookvox", version, about = "Long-form text to audiobook, resumable")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

fn parse_accel(s: &str) -> Result<AccelChoice, String> {
    match s {
        "auto" => Ok(AccelChoice::Auto),
        "on" => Ok(AccelChoice::On),
        "off" => Ok(AccelChoice::Off),
        other => Err(format!("unknown accel choice: {other}")),
    }
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse()
}

fn parse_pipeline_mode(s: &str) -> Result<PipelineMode, String> {
    s.parse()
}

fn parse_event_format(s: &str) -> Result<EventFormat, String> {
    match s {
        "text" => Ok(EventFormat::Text),
        "json" => Ok(EventFormat::Json),
        other => Err(format!("unknown event format: {other}")),
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert one or more books to audio
    Run(RunArgs),

    /// Print the effective configuration
    Config,

    /// Per-job worker process (spawned internally by `run`)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for `bookvox run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Input book files
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,

    /// Output file (single input) or directory (multiple inputs)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Voice identifier
    #[arg(long, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Speech speed multiplier
    #[arg(long, value_name = "SPEED")]
    pub speed: Option<f64>,

    /// Language/accent code
    #[arg(long, value_name = "LANG")]
    pub lang: Option<String>,

    /// Synthesis backend: auto, torch, mlx, or mock
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Hardware acceleration: auto, on, or off
    #[arg(long, default_value = "auto", value_parser = parse_accel)]
    pub accel: AccelChoice,

    /// Reserved compatibility flag; inference is sequential
    #[arg(long, default_value_t = crate::defaults::DEFAULT_WORKERS)]
    pub workers: u32,

    /// Pipeline execution mode: sequential or overlap3
    #[arg(long, value_parser = parse_pipeline_mode)]
    pub pipeline_mode: Option<PipelineMode>,

    /// Approximate max characters per chunk (default depends on backend)
    #[arg(long, value_name = "CHARS")]
    pub chunk_chars: Option<usize>,

    /// Regex used by the backend for internal splitting
    #[arg(long, value_name = "REGEX")]
    pub split_pattern: Option<String>,

    /// Output format: mp3 or m4b
    #[arg(long, value_parser = parse_format)]
    pub format: Option<OutputFormat>,

    /// Audio bitrate: 128k, 192k, or 320k
    #[arg(long, value_name = "BITRATE")]
    pub bitrate: Option<String>,

    /// Apply loudness normalization (-14 LUFS)
    #[arg(long)]
    pub normalize: bool,

    /// Enable checkpoint saving for resumable processing
    #[arg(long)]
    pub checkpoint: bool,

    /// Resume from checkpoint if available
    #[arg(long)]
    pub resume: bool,

    /// Ignore existing checkpoints and regenerate everything
    #[arg(long, alias = "start-fresh", conflicts_with = "resume")]
    pub fresh: bool,

    /// Disable the automatic fallback retry after a worker crash
    #[arg(long)]
    pub no_recovery: bool,

    /// Plan the batch and print it without running anything
    #[arg(long)]
    pub plan_only: bool,

    /// Stream raw worker events to stdout (text or json) instead of the
    /// progress display
    #[arg(long, value_parser = parse_event_format)]
    pub event_format: Option<EventFormat>,

    /// Override book title (single m4b job only)
    #[arg(long)]
    pub title: Option<String>,

    /// Override book author (single m4b job only)
    #[arg(long)]
    pub author: Option<String>,

    /// Override cover image path (single m4b job only)
    #[arg(long, value_name = "PATH")]
    pub cover: Option<PathBuf>,
}

impl RunArgs {
    /// Merge CLI flags over config values into the shared job template.
    /// Input and output fields are filled per-job by the batch planner.
    pub fn to_template(&self, config: &Config) -> JobRequest {
        JobRequest {
            input: PathBuf::new(),
            output: PathBuf::new(),
            voice: self
                .voice
                .clone()
                .unwrap_or_else(|| config.synthesis.voice.clone()),
            speed: self.speed.unwrap_or(config.synthesis.speed),
            lang: self
                .lang
                .clone()
                .unwrap_or_else(|| config.synthesis.lang.clone()),
            backend: self
                .backend
                .clone()
                .unwrap_or_else(|| config.synthesis.backend.clone()),
            accel: self.accel,
            workers: self.workers,
            pipeline_mode: self.pipeline_mode,
            chunk_chars: self.chunk_chars.or(config.synthesis.chunk_chars),
            split_pattern: self
                .split_pattern
                .clone()
                .unwrap_or_else(|| crate::defaults::DEFAULT_SPLIT_PATTERN.to_string()),
            format: self.format.unwrap_or_else(|| {
                config
                    .export
                    .format
                    .parse()
                    .unwrap_or(OutputFormat::Mp3)
            }),
            bitrate: self
                .bitrate
                .clone()
                .unwrap_or_else(|| config.export.bitrate.clone()),
            normalize: self.normalize || config.export.normalize,
            checkpoint: self.checkpoint,
            resume: self.resume,
            overrides: MetadataOverrides {
                title: self.title.clone(),
                author: self.author.clone(),
                cover: self.cover.clone(),
            },
        }
    }
}

/// Arguments for the hidden `worker` subcommand. One flag per resolved
/// knob; the controller passes everything explicitly.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[arg(long, value_name = "PATH")]
    pub input: PathBuf,

    #[arg(long, value_name = "PATH")]
    pub output: PathBuf,

    #[arg(long, default_value = crate::defaults::DEFAULT_VOICE)]
    pub voice: String,

    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    #[arg(long, default_value = crate::defaults::DEFAULT_LANG)]
    pub lang: String,

    #[arg(long, default_value = "auto")]
    pub backend: String,

    #[arg(long, default_value = "auto", value_parser = parse_accel)]
    pub accel: AccelChoice,

    #[arg(long, default_value_t = crate::defaults::DEFAULT_WORKERS)]
    pub workers: u32,

    #[arg(long, value_parser = parse_pipeline_mode)]
    pub pipeline_mode: Option<PipelineMode>,

    #[arg(long, value_name = "CHARS")]
    pub chunk_chars: Option<usize>,

    #[arg(long, default_value = crate::defaults::DEFAULT_SPLIT_PATTERN)]
    pub split_pattern: String,

    #[arg(long, default_value = "mp3", value_parser = parse_format)]
    pub format: OutputFormat,

    #[arg(long, default_value = crate::defaults::DEFAULT_BITRATE)]
    pub bitrate: String,

    #[arg(long)]
    pub normalize: bool,

    #[arg(long)]
    pub checkpoint: bool,

    #[arg(long)]
    pub resume: bool,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub cover: Option<PathBuf>,

    /// Event stream encoding on stdout: text or json
    #[arg(long, default_value = "text", value_parser = parse_event_format)]
    pub event_format: EventFormat,

    /// Inspect job resolution, chunking, and checkpoint state, then exit
    #[arg(long)]
    pub inspect_job: bool,

    /// Report checkpoint existence and source-hash validity, then exit
    #[arg(long)]
    pub check_checkpoint: bool,

    /// Emit book metadata, then exit
    #[arg(long)]
    pub extract_metadata: bool,
}

impl WorkerArgs {
    pub fn to_request(&self) -> JobRequest {
        JobRequest {
            input: self.input.clone(),
            output: self.output.clone(),
            voice: self.voice.clone(),
            speed: self.speed,
            lang: self.lang.clone(),
            backend: self.backend.clone(),
            accel: self.accel,
            workers: self.workers,
            pipeline_mode: self.pipeline_mode,
            chunk_chars: self.chunk_chars,
            split_pattern: self.split_pattern.clone(),
            format: self.format,
            bitrate: self.bitrate.clone(),
            normalize: self.normalize,
            checkpoint: self.checkpoint,
            resume: self.resume,
            overrides: MetadataOverrides {
                title: self.title.clone(),
                author: self.author.clone(),
                cover: self.cover.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_at_least_one_input() {
        assert!(Cli::try_parse_from(["bookvox", "run"]).is_err());
        assert!(Cli::try_parse_from(["bookvox", "run", "book.txt"]).is_ok());
    }

    #[test]
    fn run_parses_the_full_surface() {
        let cli = Cli::try_parse_from([
            "bookvox",
            "run",
            "a.txt",
            "b.txt",
            "--output",
            "/out",
            "--voice",
            "bf_emma",
            "--speed",
            "1.25",
            "--backend",
            "torch",
            "--accel",
            "off",
            "--pipeline-mode",
            "overlap3",
            "--format",
            "m4b",
            "--bitrate",
            "320k",
            "--normalize",
            "--checkpoint",
            "--resume",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.speed, Some(1.25));
        assert_eq!(args.accel, AccelChoice::Off);
        assert_eq!(args.pipeline_mode, Some(PipelineMode::Overlap3));
        assert_eq!(args.format, Some(OutputFormat::M4b));
        assert!(args.normalize && args.checkpoint && args.resume);
    }

    #[test]
    fn fresh_conflicts_with_resume() {
        assert!(Cli::try_parse_from(["bookvox", "run", "a.txt", "--fresh", "--resume"]).is_err());
        assert!(
            Cli::try_parse_from(["bookvox", "run", "a.txt", "--start-fresh", "--resume"]).is_err()
        );
    }

    #[test]
    fn run_accepts_machine_event_output() {
        let cli = Cli::try_parse_from([
            "bookvox",
            "run",
            "a.txt",
            "--event-format",
            "json",
            "--no-recovery",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.event_format, Some(EventFormat::Json));
        assert!(args.no_recovery);
    }

    #[test]
    fn invalid_enum_values_are_rejected() {
        assert!(Cli::try_parse_from(["bookvox", "run", "a.txt", "--format", "ogg"]).is_err());
        assert!(Cli::try_parse_from(["bookvox", "run", "a.txt", "--accel", "fast"]).is_err());
        assert!(
            Cli::try_parse_from(["bookvox", "run", "a.txt", "--pipeline-mode", "parallel"])
                .is_err()
        );
    }

    #[test]
    fn template_merges_cli_over_config() {
        let cli = Cli::try_parse_from(["bookvox", "run", "a.txt", "--voice", "am_adam"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = Config::default();
        config.synthesis.speed = 1.5;
        config.export.bitrate = "320k".to_string();

        let template = args.to_template(&config);
        assert_eq!(template.voice, "am_adam");
        assert_eq!(template.speed, 1.5);
        assert_eq!(template.bitrate, "320k");
        assert_eq!(template.format, OutputFormat::Mp3);
    }

    #[test]
    fn worker_subcommand_parses_controller_args() {
        let cli = Cli::try_parse_from([
            "bookvox",
            "worker",
            "--input",
            "in.txt",
            "--output",
            "out.mp3",
            "--speed",
            "1.25",
            "--backend",
            "mock",
            "--event-format",
            "json",
            "--checkpoint",
        ])
        .unwrap();
        let Commands::Worker(args) = cli.command else {
            panic!("expected worker");
        };
        assert_eq!(args.event_format, EventFormat::Json);
        assert!(args.checkpoint);
        let request = args.to_request();
        assert_eq!(request.backend, "mock");
        assert_eq!(request.speed, 1.25);
        assert!(request.use_checkpoint());
    }

    #[test]
    fn worker_probe_flags_parse() {
        let cli = Cli::try_parse_from([
            "bookvox",
            "worker",
            "--input",
            "in.txt",
            "--output",
            "out.mp3",
            "--check-checkpoint",
        ])
        .unwrap();
        let Commands::Worker(args) = cli.command else {
            panic!("expected worker");
        };
        assert!(args.check_checkpoint);
        assert!(!args.inspect_job);
    }
}
