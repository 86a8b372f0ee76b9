/// Error taxonomy for the approval engine
///
/// Every Engine API operation returns one of these. The first five variants are the
/// caller-facing kinds; the rest wrap infrastructure failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Referenced entity, instance, task or definition is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Adapter-reported precondition failure, surfaced verbatim
    #[error("{0}")]
    ValidationFailed(String),

    /// Decision or action by someone who is not entitled to it
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Repeated decision on a task that is already APPROVED or REJECTED
    #[error("already decided: {0}")]
    AlreadyDecided(String),

    /// Operation not valid for the current instance or task status
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Workflow definition failed structural validation
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl EngineError {
    /// Stable machine-readable kind, used by the HTTP layer
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::ValidationFailed(_) => "validation_failed",
            EngineError::NotAuthorized(_) => "not_authorized",
            EngineError::AlreadyDecided(_) => "already_decided",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::InvalidDefinition(_) => "invalid_definition",
            EngineError::Storage(_) => "storage",
            EngineError::Serialization(_) => "serialization",
            EngineError::Scheduler(_) => "scheduler",
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
