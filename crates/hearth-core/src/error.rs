//! Error types for Hearth

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using Hearth's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Hearth error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Backend errors (E100-E199)
    #[error("Backend unavailable at {endpoint}: {reason}. Is `ollama serve` running?")]
    BackendUnavailable { endpoint: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Stream failed: {0}")]
    StreamFailed(String),

    // Persistence errors (E200-E299)
    #[error("Session '{0}' not found. Run `hearth sessions list` to see all sessions.")]
    SessionNotFound(String),

    #[error("Failed to access {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt transcript {} at line {line}: {source}", .path.display())]
    TranscriptDecode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Turn errors (E300-E399)
    #[error("Compaction failed: {0}")]
    CompactionFailed(String),

    #[error("A response is already in progress. Wait for it to finish or press Ctrl-C.")]
    TurnInFlight,

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackendUnavailable { .. } => "E100",
            Self::Backend(_) => "E101",
            Self::Network(_) => "E102",
            Self::StreamFailed(_) => "E103",
            Self::SessionNotFound(_) => "E200",
            Self::Persistence { .. } => "E201",
            Self::TranscriptDecode { .. } => "E202",
            Self::Json(_) => "E203",
            Self::CompactionFailed(_) => "E300",
            Self::TurnInFlight => "E301",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::BackendUnavailable { .. } => Some("ollama serve".to_string()),
            Self::Network(_) => Some("hearth config get backend.base_url".to_string()),
            Self::SessionNotFound(_) => Some("hearth sessions list".to_string()),
            Self::Backend(msg) if msg.contains("not found") => Some("hearth models".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::SessionNotFound("x".into()).code(), "E200");
        assert_eq!(Error::TurnInFlight.code(), "E301");
        assert_eq!(Error::Other("x".into()).code(), "E9999");
    }

    #[test]
    fn test_persistence_error_names_path() {
        let err = Error::persistence(
            "/tmp/sessions/abc/meta.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/sessions/abc/meta.json"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_suggestions() {
        let err = Error::BackendUnavailable {
            endpoint: "http://127.0.0.1:11434".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.suggestion().as_deref(), Some("ollama serve"));
        assert_eq!(
            Error::Backend("model 'x' not found".into()).suggestion().as_deref(),
            Some("hearth models")
        );
        assert!(Error::TurnInFlight.suggestion().is_none());
    }
}
