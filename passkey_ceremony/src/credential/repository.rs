use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::userdb::UserHandle;

use super::errors::CredentialError;
use super::types::{CredentialId, StoredCredential};

/// Durable credential storage with globally unique ids and a compare-and-swap counter.
#[async_trait]
pub trait CredentialRepository: Send + Sync + 'static {
    async fn init(&self) -> Result<(), CredentialError>;

    async fn find_by_user_handle(
        &self,
        user_handle: &UserHandle,
    ) -> Result<Vec<StoredCredential>, CredentialError>;

    async fn find_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> Result<Option<StoredCredential>, CredentialError>;

    /// Fails with `Duplicate` if the id exists for any user.
    async fn insert(&self, credential: &StoredCredential) -> Result<(), CredentialError>;

    /// Advances the counter atomically; see [`counter_advances`](super::counter_advances).
    async fn increment_counter(
        &self,
        credential_id: &CredentialId,
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), CredentialError>;

    /// Marks a credential as a suspected clone.
    async fn flag_credential(&self, credential_id: &CredentialId) -> Result<(), CredentialError>;

    /// Removes a credential. Fails with `NotFound` if it does not exist.
    async fn delete_credential(&self, credential_id: &CredentialId) -> Result<(), CredentialError>;
}
