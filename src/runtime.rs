//! Host probing and knob resolution.
//!
//! All probing happens once, before the pipeline starts; the resolved
//! choices are surfaced as metadata events and never re-derived mid-job.

use crate::defaults;
use crate::profile::{BackendKind, OutputFormat, PipelineMode};
use std::path::PathBuf;

const LOW_MEMORY_THRESHOLD_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Requested acceleration setting before resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelChoice {
    Auto,
    On,
    Off,
}

fn parse_env_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn is_apple_silicon_host() -> bool {
    cfg!(all(target_os = "macos", target_arch = "aarch64"))
}

#[cfg(target_os = "macos")]
fn total_memory_bytes() -> Option<u64> {
    let probe = std::process::Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .ok()?;
    if !probe.status.success() {
        return None;
    }
    String::from_utf8_lossy(&probe.stdout).trim().parse().ok()
}

#[cfg(not(target_os = "macos"))]
fn total_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// Whether this host should get the conservative low-memory treatment.
///
/// Overridable with BOOKVOX_FORCE_LOW_MEMORY for testing.
pub fn is_low_memory_host() -> bool {
    if let Ok(forced) = std::env::var("BOOKVOX_FORCE_LOW_MEMORY")
        && let Some(value) = parse_env_bool(&forced)
    {
        return value;
    }

    if !is_apple_silicon_host() {
        return false;
    }

    match total_memory_bytes() {
        Some(total) => total <= LOW_MEMORY_THRESHOLD_BYTES,
        None => false,
    }
}

/// Locate an executable on PATH, like `which`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Resolve `"auto"` backend selection into a concrete kind.
///
/// This is the one capability-probe step: the MLX runner is only chosen
/// when its executable is actually present, and never on low-memory Apple
/// hosts where it is known to destabilize multi-book runs.
pub fn resolve_backend(requested: &str) -> Result<BackendKind, String> {
    if requested != "auto" {
        return requested.parse();
    }

    if is_apple_silicon_host()
        && !is_low_memory_host()
        && find_in_path(crate::synth::MLX_RUNNER).is_some()
    {
        return Ok(BackendKind::Mlx);
    }

    Ok(BackendKind::Torch)
}

/// Resolve the acceleration flag for a backend.
///
/// Returns the flag plus any compatibility warnings.
pub fn resolve_accel(
    requested: AccelChoice,
    backend: BackendKind,
) -> (bool, Vec<String>) {
    let mut warnings = Vec::new();

    match backend {
        BackendKind::Mlx => {
            // MLX is accelerated by construction.
            if requested == AccelChoice::Off {
                warnings.push("--accel=off is ignored for the MLX backend.".to_string());
            }
            (true, warnings)
        }
        BackendKind::Mock => {
            if requested == AccelChoice::On {
                warnings.push("--accel=on is ignored for the mock backend.".to_string());
            }
            (false, warnings)
        }
        BackendKind::Torch => match requested {
            AccelChoice::On => (true, warnings),
            AccelChoice::Off => (false, warnings),
            AccelChoice::Auto => {
                let accel = is_apple_silicon_host() && !is_low_memory_host();
                (accel, warnings)
            }
        },
    }
}

/// Default chunk size for a backend on this host.
pub fn default_chunk_chars(backend: BackendKind) -> usize {
    if backend == BackendKind::Torch && is_low_memory_host() {
        return defaults::SAFE_CHUNK_CHARS;
    }
    backend.default_chunk_chars()
}

/// Resolve the effective pipeline mode and any compatibility warnings.
///
/// Requesting overlap3 outside its valid combination (streaming MP3 with
/// checkpointing off) degrades to sequential with a warning, never an
/// error: both persistence and the container spool need a single-writer
/// view of chunk completion that the overlapped stages would violate.
pub fn resolve_pipeline_mode(
    requested: Option<PipelineMode>,
    format: OutputFormat,
    use_checkpoint: bool,
) -> (PipelineMode, Vec<String>) {
    let mut warnings = Vec::new();
    let mode = requested.unwrap_or(PipelineMode::Sequential);

    if mode == PipelineMode::Overlap3 && (format != OutputFormat::Mp3 || use_checkpoint) {
        warnings.push(
            "pipeline mode overlap3 is supported only for MP3 without checkpointing; \
             falling back to sequential."
                .to_string(),
        );
        return (PipelineMode::Sequential, warnings);
    }

    (mode, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap3_valid_combination_is_kept() {
        let (mode, warnings) =
            resolve_pipeline_mode(Some(PipelineMode::Overlap3), OutputFormat::Mp3, false);
        assert_eq!(mode, PipelineMode::Overlap3);
        assert!(warnings.is_empty());
    }

    #[test]
    fn overlap3_with_checkpoint_degrades_with_warning() {
        let (mode, warnings) =
            resolve_pipeline_mode(Some(PipelineMode::Overlap3), OutputFormat::Mp3, true);
        assert_eq!(mode, PipelineMode::Sequential);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("falling back to sequential"));
    }

    #[test]
    fn overlap3_with_m4b_degrades_with_warning() {
        let (mode, warnings) =
            resolve_pipeline_mode(Some(PipelineMode::Overlap3), OutputFormat::M4b, false);
        assert_eq!(mode, PipelineMode::Sequential);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unrequested_mode_defaults_to_sequential() {
        let (mode, warnings) = resolve_pipeline_mode(None, OutputFormat::M4b, true);
        assert_eq!(mode, PipelineMode::Sequential);
        assert!(warnings.is_empty());
    }

    #[test]
    fn explicit_backend_bypasses_probe() {
        assert_eq!(resolve_backend("mock").unwrap(), BackendKind::Mock);
        assert_eq!(resolve_backend("torch").unwrap(), BackendKind::Torch);
        assert!(resolve_backend("cuda").is_err());
    }

    #[test]
    fn mlx_backend_forces_accel() {
        let (accel, warnings) = resolve_accel(AccelChoice::Off, BackendKind::Mlx);
        assert!(accel);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn mock_backend_never_accelerates() {
        let (accel, _) = resolve_accel(AccelChoice::On, BackendKind::Mock);
        assert!(!accel);
    }

    #[test]
    fn torch_explicit_accel_is_honored() {
        let (accel, warnings) = resolve_accel(AccelChoice::On, BackendKind::Torch);
        assert!(accel);
        assert!(warnings.is_empty());

        let (accel, _) = resolve_accel(AccelChoice::Off, BackendKind::Torch);
        assert!(!accel);
    }
}
