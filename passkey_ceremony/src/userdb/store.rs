use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::UserError;
use super::types::{UserHandle, UserIdentity};

#[async_trait]
pub trait IdentityStore: Send + Sync + 'static {
    /// Creates and validates the backing tables, if any.
    async fn init(&self) -> Result<(), UserError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<UserIdentity>, UserError>;

    async fn find_by_handle(&self, handle: &UserHandle) -> Result<Option<UserIdentity>, UserError>;

    /// Inserts a new identity. Fails with `Conflict` if the name or handle is taken.
    async fn insert(&self, identity: &UserIdentity) -> Result<(), UserError>;

    /// Returns the identity named `name`, creating it with a fresh handle if absent.
    async fn resolve_or_create(
        &self,
        name: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<UserIdentity, UserError> {
        let candidate = UserIdentity::new(UserHandle::generate()?, name, display_name, now);
        self.resolve_or_insert(candidate).await
    }

    /// Returns the identity named like `candidate`, inserting `candidate` if absent.
    ///
    /// A concurrent first-time insert for the same name loses on the unique
    /// constraint and is answered with the winner's record.
    async fn resolve_or_insert(&self, candidate: UserIdentity) -> Result<UserIdentity, UserError> {
        if let Some(existing) = self.find_by_name(&candidate.name).await? {
            return Ok(existing);
        }

        match self.insert(&candidate).await {
            Ok(()) => {
                tracing::info!(
                    "Created identity: name={}, user_handle={}",
                    candidate.name,
                    candidate.user_handle
                );
                Ok(candidate)
            }
            Err(UserError::Conflict(reason)) => {
                tracing::debug!(
                    "Lost identity creation race for {}: {}",
                    candidate.name,
                    reason
                );
                self.find_by_name(&candidate.name)
                    .await?
                    .ok_or(UserError::Conflict(reason))
            }
            Err(e) => Err(e),
        }
    }
}
