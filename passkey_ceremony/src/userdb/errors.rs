use thiserror::Error;

use crate::storage::StorageError;
use crate::utils::UtilError;

#[derive(Clone, Error, Debug, PartialEq)]
pub enum UserError {
    #[error("User not found")]
    NotFound,

    #[error("User already exists: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl From<StorageError> for UserError {
    fn from(err: StorageError) -> Self {
        UserError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for UserError {
    fn from(err: sqlx::Error) -> Self {
        UserError::Storage(err.to_string())
    }
}

impl From<UtilError> for UserError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::Crypto(msg) => UserError::Crypto(msg),
            UtilError::Format(msg) => UserError::InvalidData(msg),
        }
    }
}
