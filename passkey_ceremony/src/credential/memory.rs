use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::userdb::UserHandle;

use super::errors::CredentialError;
use super::repository::CredentialRepository;
use super::types::{CredentialId, StoredCredential, counter_advances};

#[derive(Default)]
pub struct InMemoryCredentialRepository {
    credentials: Mutex<HashMap<CredentialId, StoredCredential>>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn init(&self) -> Result<(), CredentialError> {
        Ok(())
    }

    async fn find_by_user_handle(
        &self,
        user_handle: &UserHandle,
    ) -> Result<Vec<StoredCredential>, CredentialError> {
        let mut found: Vec<StoredCredential> = self
            .credentials
            .lock()
            .await
            .values()
            .filter(|c| &c.user_handle == user_handle)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    async fn find_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> Result<Option<StoredCredential>, CredentialError> {
        Ok(self.credentials.lock().await.get(credential_id).cloned())
    }

    async fn insert(&self, credential: &StoredCredential) -> Result<(), CredentialError> {
        let mut credentials = self.credentials.lock().await;
        if credentials.contains_key(&credential.credential_id) {
            return Err(CredentialError::Duplicate(credential.credential_id.to_string()));
        }
        credentials.insert(credential.credential_id.clone(), credential.clone());
        Ok(())
    }

    async fn increment_counter(
        &self,
        credential_id: &CredentialId,
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        let mut credentials = self.credentials.lock().await;
        let credential = credentials
            .get_mut(credential_id)
            .ok_or(CredentialError::NotFound)?;

        if !counter_advances(credential.counter, new_counter) {
            return Err(CredentialError::CounterRegression {
                stored: credential.counter,
                received: new_counter,
            });
        }

        credential.counter = new_counter;
        credential.last_used_at = Some(used_at);
        Ok(())
    }

    async fn flag_credential(&self, credential_id: &CredentialId) -> Result<(), CredentialError> {
        let mut credentials = self.credentials.lock().await;
        let credential = credentials
            .get_mut(credential_id)
            .ok_or(CredentialError::NotFound)?;
        credential.flagged = true;
        Ok(())
    }
    async fn delete_credential(&self, credential_id: &CredentialId) -> Result<(), CredentialError> {
        self.credentials
            .lock()
            .await
            .remove(credential_id)
            .map(|_| ())
            .ok_or(CredentialError::NotFound)
    }
}
