//! Speech synthesis capability behind one swappable interface.
//!
//! Backend selection happens once per job (see `runtime::resolve_backend`)
//! and is reported as resolved metadata; the pipeline only ever talks to
//! [`SpeechBackend`].

mod mock;
mod process;

pub use mock::MockBackend;
pub use process::ProcessBackend;

use crate::error::Result;
use crate::profile::{BackendKind, ExecutionProfile};

/// External runner executable for the torch backend.
pub const TORCH_RUNNER: &str = "bookvox-kokoro-torch";
/// External runner executable for the MLX backend.
pub const MLX_RUNNER: &str = "bookvox-kokoro-mlx";

/// Trait for text-to-speech synthesis.
///
/// Implementations must be deterministic for identical `(text, profile)`
/// input to whatever degree the underlying model is; the mock backend is
/// fully deterministic and is the test double.
pub trait SpeechBackend: Send {
    /// Synthesize one chunk of text into i16 mono PCM at [`sample_rate`].
    ///
    /// [`sample_rate`]: SpeechBackend::sample_rate
    fn synthesize(&self, text: &str) -> Result<Vec<i16>>;

    /// Fixed output sample rate of this backend.
    fn sample_rate(&self) -> u32;

    /// Backend name for metadata reporting.
    fn name(&self) -> &str;
}

/// Create a backend instance for a resolved profile. `split_pattern` is
/// handed through to the external runners, which pace synthesis on it; the
/// mock backend has no use for it.
pub fn create_backend(
    profile: &ExecutionProfile,
    split_pattern: &str,
) -> Result<Box<dyn SpeechBackend>> {
    match profile.backend {
        BackendKind::Torch => Ok(Box::new(ProcessBackend::new(
            TORCH_RUNNER,
            profile,
            split_pattern,
        )?)),
        BackendKind::Mlx => Ok(Box::new(ProcessBackend::new(
            MLX_RUNNER,
            profile,
            split_pattern,
        )?)),
        BackendKind::Mock => Ok(Box::new(MockBackend::new(profile))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_backend_is_always_constructible() {
        let profile = ExecutionProfile {
            backend: BackendKind::Mock,
            ..ExecutionProfile::default()
        };
        let backend = create_backend(&profile, r"\n+").unwrap();
        assert_eq!(backend.name(), "mock");
        assert_eq!(backend.sample_rate(), crate::defaults::SAMPLE_RATE);
    }

    #[test]
    fn trait_is_object_safe() {
        let profile = ExecutionProfile {
            backend: BackendKind::Mock,
            ..ExecutionProfile::default()
        };
        let backend: Box<dyn SpeechBackend> = Box::new(MockBackend::new(&profile));
        assert!(backend.synthesize("hello").is_ok());
    }
}
