//! Pipeline error types

use thiserror::Error;

use portal_transform::TransformError;
use portal_transport::TransportError;

/// Errors surfaced by the orchestrator and the target contract
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transport failure, including the fork signal before resolution
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// A transformer hook failed
    #[error("transform: {0}")]
    Transform(#[from] TransformError),

    /// The target failed to load or persist state
    #[error("target: {message}")]
    Target { message: String },

    /// A fork was reported with nothing to reconcile against
    #[error("fork reported with no previous blocks to reconcile against")]
    ForkWithoutHistory,

    /// A fork occurred but the target does not implement fork recovery
    #[error("a fork occurred but the target does not support fork recovery")]
    ForkUnsupported,

    /// Recovery would require rolling back past the finalized head
    #[error("cannot roll back past the finalized head")]
    ForkBeyondFinalized,

    /// The pipeline was cancelled
    #[error("pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Target failure with a message
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }
}
