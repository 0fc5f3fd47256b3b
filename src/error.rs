//! Error taxonomy for the ingestion and sync engines.
//!
//! Most plumbing returns `anyhow::Result`; the variants below are raised
//! where a caller needs to tell failure classes apart (the HTTP layer maps
//! them onto status codes via `downcast_ref`). Per-item failures inside a
//! batch are never errors: they are tagged outcomes in the pipeline and
//! sync modules.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The repository URL did not contain an owner/repo pair.
    #[error("invalid repository url: {0}")]
    InvalidRepoUrl(String),

    /// The provider answered with a non-success status.
    #[error("provider error {status}: {message}")]
    Provider { status: u16, message: String },

    /// The provider refused the call because a rate limit was hit.
    #[error("provider rate limited: {message}")]
    RateLimited { message: String },

    /// The requested repository, ref, or path does not exist (or is not
    /// visible with the supplied token).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("generative model provider is disabled")]
    ModelDisabled,
}

impl IngestError {
    /// Whether the error came from an upstream provider rather than input.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            IngestError::Provider { .. } | IngestError::RateLimited { .. } | IngestError::NotFound(_)
        )
    }
}
