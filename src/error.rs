//! Error types for bookvox.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookvoxError {
    // Input errors — fatal, job-local, never retried
    #[error("Input file not found: {path}")]
    InputNotFound { path: String },

    #[error("Failed to parse input {path}: {message}")]
    InputParse { path: String, message: String },

    #[error("No text chunks produced from input")]
    EmptyInput,

    #[error("Cover override file not found: {path}")]
    CoverNotFound { path: String },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Synthesis errors
    #[error("Failed to initialize '{backend}' backend: {message}")]
    BackendInit { backend: String, message: String },

    #[error("Synthesis failed on chunk {chunk}: {message}")]
    Synthesis { chunk: usize, message: String },

    // Checkpoint errors
    #[error("Checkpoint store error: {message}")]
    Checkpoint { message: String },

    #[error("Checkpoint state is corrupt: {0}")]
    CheckpointState(#[from] serde_json::Error),

    // Export errors
    #[error("ffmpeg not found. Install ffmpeg and ensure it is on PATH")]
    FfmpegMissing,

    #[error("ffmpeg failed: {stderr}")]
    FfmpegFailed { stderr: String },

    #[error("Export stream is not writable: {message}")]
    ExportStream { message: String },

    // Worker process errors
    #[error("Worker process error: {message}")]
    Worker { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chunk audio record error: {0}")]
    ChunkAudio(#[from] hound::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, BookvoxError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn input_not_found_display() {
        let error = BookvoxError::InputNotFound {
            path: "/books/missing.txt".to_string(),
        };
        assert_eq!(error.to_string(), "Input file not found: /books/missing.txt");
    }

    #[test]
    fn synthesis_display_names_chunk() {
        let error = BookvoxError::Synthesis {
            chunk: 7,
            message: "runner exited with status 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Synthesis failed on chunk 7: runner exited with status 1"
        );
    }

    #[test]
    fn ffmpeg_failed_carries_stderr() {
        let error = BookvoxError::FfmpegFailed {
            stderr: "unknown encoder 'aac'".to_string(),
        };
        assert!(error.to_string().contains("unknown encoder"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: BookvoxError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: BookvoxError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BookvoxError>();
        assert_sync::<BookvoxError>();
    }

    #[test]
    fn result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
