use thiserror::Error;

/// Failures reading or writing the configuration objects.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),
    /// Optimistic-concurrency conflict; the write should be retried on fresh data.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    Other(String),
}

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SourceError::Conflict(_))
    }
}

/// Failure applying a single object, classified by the apply primitive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    Other(String),
}

impl ApplyError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApplyError::Conflict(_))
    }
}

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("object is not a JSON map")]
    NotAnObject,
    #[error("object missing {0}")]
    Missing(&'static str),
    #[error("object already controlled by {kind} {name}")]
    AlreadyOwned { kind: String, name: String },
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
