//! Crate-wide error kinds.
//!
//! Every fallible operation in the adapter plane, connection lifecycle, and
//! translator returns `Result<T, AnchorError>`. Callers must not string-match
//! on `Backend::cause` — it exists for logging, not control flow.

use thiserror::Error;

/// The exhaustive error surface of the anchor core.
#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("no adapter registered for backend {0:?}")]
    NotRegistered(String),

    #[error("failed to connect to {host}:{port}: {cause}")]
    ConnectError {
        host: String,
        port: u16,
        cause: String,
    },

    #[error("connection {0:?} already exists")]
    AlreadyConnected(String),

    #[error("{0:?} not found")]
    NotFound(String),

    #[error("connection {0:?} is not connected")]
    NotConnected(String),

    #[error("backend {backend:?} does not support operation {op:?}: {reason}")]
    UnsupportedOperation {
        backend: String,
        op: String,
        reason: String,
    },

    #[error("invalid {field}: {reason}")]
    ValidationError { field: String, reason: String },

    #[error("backend {backend:?} error during {op:?}: {cause}")]
    Backend {
        backend: String,
        op: String,
        cause: String,
    },

    #[error("operation timed out")]
    Timeout,
}

impl AnchorError {
    pub fn backend(backend: impl Into<String>, op: impl Into<String>, cause: impl ToString) -> Self {
        AnchorError::Backend {
            backend: backend.into(),
            op: op.into(),
            cause: cause.to_string(),
        }
    }

    pub fn unsupported(
        backend: impl Into<String>,
        op: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        AnchorError::UnsupportedOperation {
            backend: backend.into(),
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AnchorError::ValidationError {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type AnchorResult<T> = Result<T, AnchorError>;

/// A warning accumulated on a `TranslationContext`. `DataLoss` and
/// `Compatibility` are warning-level, never fatal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum TranslationWarning {
    DataLoss { field: String, note: String },
    Compatibility { object: String, note: String },
    Excluded { object: String, note: String },
}

/// Composite error for operations that aggregate multiple independent
/// failures, such as disconnecting an entire connection pool at once.
#[derive(Debug, Error)]
#[error("{0} of {1} operations failed: {2:?}")]
pub struct CompositeError(pub usize, pub usize, pub Vec<String>);
