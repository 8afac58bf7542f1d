//! Error types shared across Layercut crates.

use std::path::PathBuf;

/// Top-level error type for Layercut operations.
#[derive(Debug, thiserror::Error)]
pub enum LayercutError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Failed to fetch {} resource(s): {}", failed.len(), failed.join("; "))]
    ResourceFetch { failed: Vec<String> },

    #[error("Filter plan error: {message}")]
    Plan { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Render rejected: {message}")]
    ConcurrencyRejection { message: String },

    #[error("Render cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using LayercutError.
pub type LayercutResult<T> = Result<T, LayercutError>;

/// Coarse classification surfaced to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    ResourceFetch,
    Plan,
    Encode,
    ConcurrencyRejection,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::ResourceFetch => "resource_fetch",
            FailureKind::Plan => "plan",
            FailureKind::Encode => "encode",
            FailureKind::ConcurrencyRejection => "concurrency_rejection",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl LayercutError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn plan(msg: impl Into<String>) -> Self {
        Self::Plan {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::ConcurrencyRejection {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Classify this error for user-facing status reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            LayercutError::Validation { .. } => FailureKind::Validation,
            LayercutError::ResourceFetch { .. } | LayercutError::FileNotFound { .. } => {
                FailureKind::ResourceFetch
            }
            LayercutError::Plan { .. } => FailureKind::Plan,
            LayercutError::Encode { .. } => FailureKind::Encode,
            LayercutError::ConcurrencyRejection { .. } => FailureKind::ConcurrencyRejection,
            LayercutError::Cancelled => FailureKind::Cancelled,
            LayercutError::Config { .. }
            | LayercutError::Unsupported { .. }
            | LayercutError::Io(_)
            | LayercutError::Json(_)
            | LayercutError::Other(_) => FailureKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_fetch_message_lists_every_failure() {
        let err = LayercutError::ResourceFetch {
            failed: vec!["overlay 2: missing".into(), "overlay 5: missing".into()],
        };
        let text = err.to_string();
        assert!(text.starts_with("Failed to fetch 2 resource(s)"));
        assert!(text.contains("overlay 2"));
        assert!(text.contains("overlay 5"));
        assert_eq!(err.kind(), FailureKind::ResourceFetch);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(LayercutError::Cancelled.kind(), FailureKind::Cancelled);
        assert_eq!(
            LayercutError::rejected("busy").kind(),
            FailureKind::ConcurrencyRejection
        );
        assert_eq!(LayercutError::encode("boom").kind(), FailureKind::Encode);
        assert_eq!(
            LayercutError::config("bad").kind(),
            FailureKind::Internal
        );
    }
}
