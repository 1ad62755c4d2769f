//! User configuration loaded from TOML.
//!
//! CLI flags override config values; config values override the built-in
//! defaults. Missing file means defaults, invalid TOML is an error.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub synthesis: SynthesisConfig,
    pub export: ExportConfig,
}

/// Synthesis defaults applied when the CLI does not override them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub voice: String,
    pub speed: f64,
    pub lang: String,
    /// Backend selection: "auto", "torch", "mlx", or "mock".
    pub backend: String,
    /// Chunk size override; `None` uses the backend default.
    pub chunk_chars: Option<usize>,
}

/// Export defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    pub format: String,
    pub bitrate: String,
    pub normalize: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice: defaults::DEFAULT_VOICE.to_string(),
            speed: 1.0,
            lang: defaults::DEFAULT_LANG.to_string(),
            backend: "auto".to_string(),
            chunk_chars: None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: "mp3".to_string(),
            bitrate: defaults::DEFAULT_BITRATE.to_string(),
            normalize: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields fall back to their defaults; invalid TOML is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or return defaults if it is missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported variables:
    /// - BOOKVOX_VOICE → synthesis.voice
    /// - BOOKVOX_BACKEND → synthesis.backend
    /// - BOOKVOX_BITRATE → export.bitrate
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(voice) = std::env::var("BOOKVOX_VOICE")
            && !voice.is_empty()
        {
            self.synthesis.voice = voice;
        }

        if let Ok(backend) = std::env::var("BOOKVOX_BACKEND")
            && !backend.is_empty()
        {
            self.synthesis.backend = backend;
        }

        if let Ok(bitrate) = std::env::var("BOOKVOX_BITRATE")
            && !bitrate.is_empty()
        {
            self.export.bitrate = bitrate;
        }

        self
    }

    /// Default configuration file path: ~/.config/bookvox/config.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bookvox").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_constants() {
        let config = Config::default();
        assert_eq!(config.synthesis.voice, defaults::DEFAULT_VOICE);
        assert_eq!(config.synthesis.backend, "auto");
        assert_eq!(config.export.bitrate, defaults::DEFAULT_BITRATE);
        assert!(!config.export.normalize);
    }

    #[test]
    fn load_partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[synthesis]\nvoice = \"bf_emma\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.synthesis.voice, "bf_emma");
        // Untouched sections keep defaults
        assert_eq!(config.export.format, "mp3");
        assert_eq!(config.synthesis.speed, 1.0);
    }

    #[test]
    fn load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/bookvox.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "synthesis = not valid").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let config = Config {
            synthesis: SynthesisConfig {
                voice: "am_adam".to_string(),
                speed: 1.2,
                lang: "b".to_string(),
                backend: "torch".to_string(),
                chunk_chars: Some(500),
            },
            export: ExportConfig {
                format: "m4b".to_string(),
                bitrate: "320k".to_string(),
                normalize: true,
            },
        };
        let text = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
