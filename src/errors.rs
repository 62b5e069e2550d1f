use thiserror::Error;

use crate::storage::WriteCommand;

/// Failures raised by key-value stores and ledger backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Error type shared by the scheduler, forecast, and notification components.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    /// The in-memory state was already updated; `retry` replays the identical write.
    #[error("failed to persist `{key}`: {source}")]
    Persistence {
        key: String,
        #[source]
        source: StoreError,
        retry: Box<WriteCommand>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn persistence(source: StoreError, retry: WriteCommand) -> Self {
        EngineError::Persistence {
            key: retry.target().to_string(),
            source,
            retry: Box::new(retry),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Persistence { .. })
    }

    /// Returns the write that failed, if this error came from a persistence flush.
    pub fn retry_command(&self) -> Option<&WriteCommand> {
        match self {
            EngineError::Persistence { retry, .. } => Some(retry.as_ref()),
            _ => None,
        }
    }
}
