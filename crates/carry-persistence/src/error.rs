//! Persistence error types.

use carry_position::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

impl From<PersistenceError> for StoreError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::Io(e) => StoreError::Io(e.to_string()),
            PersistenceError::Json(e) => StoreError::Serialization(e.to_string()),
        }
    }
}
