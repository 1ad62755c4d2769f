//! Deterministic in-process backend for tests and dry runs.

use super::SpeechBackend;
use crate::defaults;
use crate::error::Result;
use crate::profile::ExecutionProfile;

/// Fast, deterministic backend that generates synthetic tone PCM.
///
/// Identical `(text, voice, speed)` always yields byte-identical samples,
/// which is what the fingerprint invariant requires of a backend.
pub struct MockBackend {
    speed: f64,
}

impl MockBackend {
    pub fn new(profile: &ExecutionProfile) -> Self {
        Self {
            speed: profile.speed,
        }
    }

    fn segment_to_audio(&self, segment: &str) -> Vec<i16> {
        let safe_speed = self.speed.max(0.1);
        let base_len = ((segment.chars().count() as f64) * (160.0 / safe_speed)) as usize;
        let base_len = base_len.clamp(480, 48_000);

        let seed: u64 = segment
            .chars()
            .enumerate()
            .map(|(idx, ch)| (idx as u64 + 1) * ch as u64)
            .sum::<u64>()
            % 9973;
        let freq_hz = 180.0 + (seed % 220) as f64;
        let phase = (seed % 360) as f64 * std::f64::consts::PI / 180.0;
        let sample_rate = defaults::SAMPLE_RATE as f64;

        (0..base_len)
            .map(|t| {
                let wave =
                    (2.0 * std::f64::consts::PI * freq_hz * t as f64 / sample_rate + phase).sin();
                // Fade from 0.9 to 0.5 over the segment.
                let envelope = 0.9 - 0.4 * (t as f64 / base_len.max(1) as f64);
                (wave * envelope * 12_000.0).clamp(-32_768.0, 32_767.0) as i16
            })
            .collect()
    }
}

impl SpeechBackend for MockBackend {
    fn synthesize(&self, text: &str) -> Result<Vec<i16>> {
        let mut samples = Vec::new();
        let mut any_segment = false;
        for segment in text.split('\n').map(str::trim).filter(|s| !s.is_empty()) {
            any_segment = true;
            samples.extend(self.segment_to_audio(segment));
        }
        if !any_segment && !text.trim().is_empty() {
            samples = self.segment_to_audio(text.trim());
        }
        Ok(samples)
    }

    fn sample_rate(&self) -> u32 {
        defaults::SAMPLE_RATE
    }

    fn name(&self) -> &str {
        "mock"
    }
}
