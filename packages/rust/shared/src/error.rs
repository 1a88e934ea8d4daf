//! Error types for rtools.
//!
//! Library crates use [`RtoolsError`] via `thiserror`.
//! The `rt` binary wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all rtools operations.
#[derive(Debug, thiserror::Error)]
pub enum RtoolsError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to GitHub or Dropbox.
    #[error("network error: {0}")]
    Network(String),

    /// An external program could not be started or failed hard.
    #[error("process error: {0}")]
    Process(String),

    /// Malformed JSON in a configuration or registry file.
    #[error("invalid JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid input (unknown tool, bad argument, unsafe path, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RtoolsError>;

impl RtoolsError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a `serde_json::Error` with the file it came from.
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the caller's input rather than the environment.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Json { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = RtoolsError::config("projects must be a list");
        assert_eq!(err.to_string(), "config error: projects must be a list");

        let err = RtoolsError::validation("unknown tool: frobnicate");
        assert!(err.to_string().contains("frobnicate"));
        assert!(err.is_client_error());
    }

    #[test]
    fn io_error_keeps_path() {
        let err = RtoolsError::io(
            "/tmp/missing.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("missing.json"));
        assert!(!err.is_client_error());
    }
}
