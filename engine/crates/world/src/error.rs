use persistence::PersistenceError;
use thiserror::Error;

/// Raised by a single typeclass hook. Never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("{kind} #{id} not found")]
    NotFound { kind: &'static str, id: i64 },
}

impl From<serde_json::Error> for WorldError {
    fn from(e: serde_json::Error) -> Self {
        WorldError::Persistence(e.into())
    }
}
