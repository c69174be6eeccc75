use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CredentialError {
    #[error("Credential not found")]
    NotFound,

    #[error("Duplicate credential: {0}")]
    Duplicate(String),

    #[error("Signature counter regression: stored {stored}, received {received}")]
    CounterRegression { stored: u32, received: u32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<StorageError> for CredentialError {
    fn from(err: StorageError) -> Self {
        CredentialError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for CredentialError {
    fn from(err: sqlx::Error) -> Self {
        CredentialError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(err: serde_json::Error) -> Self {
        CredentialError::InvalidData(err.to_string())
    }
}
