use thiserror::Error;

/// Failures raised inside the pipeline before classification.
///
/// The error classifier maps these by variant. Display strings may carry
/// caller-supplied identifiers and are for humans only.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid hash format: {0}")]
    InvalidHash(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unsupported network id {0}")]
    UnsupportedNetwork(u64),

    #[error("missing connection configuration for network {0}")]
    MissingConnectionConfig(u64),

    #[error("{kind} {identifier} not found")]
    NotFound {
        kind: &'static str,
        identifier: String,
    },

    #[error("{operation} timed out after {ms}ms")]
    Timeout { operation: &'static str, ms: u64 },

    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("rate limit exceeded: too many requests")]
    RateLimited,

    #[error("text generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
