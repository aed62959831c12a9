/// Errors surfaced through the control/inspection façade.
///
/// The admin surface maps `ProbeNotFound` to its own not-found response;
/// everything else is an internal failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("probe '{0}' not found")]
    ProbeNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
