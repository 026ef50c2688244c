//! Transform error types

use thiserror::Error;

/// Errors raised by transformer hooks
#[derive(Debug, Error)]
pub enum TransformError {
    /// A transformer's own logic failed
    #[error("transformer {id} failed: {message}")]
    Failed { id: String, message: String },

    /// A hook was invoked in the wrong lifecycle state
    #[error("transformer {id} not started")]
    NotStarted { id: String },

    /// The shared cancellation signal fired mid-transform
    #[error("transform cancelled")]
    Cancelled,
}

impl TransformError {
    /// Create a failure for the given transformer id
    pub fn failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a not-started error
    pub fn not_started(id: impl Into<String>) -> Self {
        Self::NotStarted { id: id.into() }
    }
}
