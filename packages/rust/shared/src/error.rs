//! Error types for kbmirror.
//!
//! Library crates use [`KbMirrorError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kbmirror operations.
#[derive(Debug, thiserror::Error)]
pub enum KbMirrorError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport failure: DNS, connect, TLS, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The instance rejected our credentials (HTTP 401/403).
    #[error("authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    /// Any other non-success HTTP status from the Table API.
    #[error("API error: {url} returned HTTP {status}")]
    Api { status: u16, url: String },

    /// Response body was not the JSON shape we expected.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid format, out of range, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbMirrorError>;

impl KbMirrorError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

    /// Whether this error came from talking to the instance.
    ///
    /// Connectivity errors abort a run before anything is written.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Auth { .. } | Self::Api { .. } | Self::Parse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = KbMirrorError::config("SERVICENOW_PASSWORD is not set");
        assert_eq!(err.to_string(), "config error: SERVICENOW_PASSWORD is not set");

        let err = KbMirrorError::Auth {
            status: 401,
            message: "check username and password".into(),
        };
        assert!(err.to_string().contains("HTTP 401"));
    }

    #[test]
    fn connectivity_classification() {
        assert!(KbMirrorError::Network("timed out".into()).is_connectivity());
        assert!(
            KbMirrorError::Api {
                status: 500,
                url: "https://x/api".into()
            }
            .is_connectivity()
        );
        assert!(!KbMirrorError::config("bad").is_connectivity());
        assert!(
            !KbMirrorError::io("/tmp/x", std::io::Error::other("disk full")).is_connectivity()
        );
    }
}
