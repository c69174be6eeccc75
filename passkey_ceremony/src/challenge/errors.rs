use thiserror::Error;

use crate::storage::StorageError;
use crate::utils::UtilError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChallengeError {
    #[error("Challenge not found")]
    NotFound,

    #[error("Challenge expired")]
    Expired,

    #[error("Challenge already used")]
    AlreadyUsed,

    #[error("Invalid challenge TTL: {0}")]
    InvalidTtl(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<UtilError> for ChallengeError {
    fn from(err: UtilError) -> Self {
        ChallengeError::Crypto(err.to_string())
    }
}
