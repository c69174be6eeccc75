use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage::StorageError;

use super::types::{Challenge, Nonce};

/// Result of an atomic check-and-invalidate.
#[derive(Debug, Clone, PartialEq)]
pub enum TakeOutcome {
    /// The challenge was outstanding and is now consumed.
    Taken(Challenge),
    /// A tombstone for this nonce is still retained.
    AlreadyConsumed,
    Missing,
}

/// Storage for outstanding challenges.
///
/// Records are retained until `retain_until`; once taken, a record becomes a
/// tombstone so later attempts are told apart from unknown nonces.
#[async_trait]
pub trait ChallengeBackend: Send + Sync + 'static {
    async fn init(&self) -> Result<(), StorageError>;

    /// Stores `challenge` unless its nonce is already present. Returns false on collision.
    async fn put_if_absent(
        &self,
        challenge: &Challenge,
        retain_until: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Consumes the record for `nonce` in one atomic step.
    async fn take(&self, nonce: &Nonce, now: DateTime<Utc>) -> Result<TakeOutcome, StorageError>;

    /// Removes records whose retention has passed. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError>;
}
