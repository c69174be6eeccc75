use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::errors::UserError;
use super::store::IdentityStore;
use super::types::{UserHandle, UserIdentity};

/// Identity store kept in process memory.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    by_name: Mutex<HashMap<String, UserIdentity>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn init(&self) -> Result<(), UserError> {
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<UserIdentity>, UserError> {
        Ok(self.by_name.lock().await.get(name).cloned())
    }

    async fn find_by_handle(&self, handle: &UserHandle) -> Result<Option<UserIdentity>, UserError> {
        Ok(self
            .by_name
            .lock()
            .await
            .values()
            .find(|identity| &identity.user_handle == handle)
            .cloned())
    }

    async fn insert(&self, identity: &UserIdentity) -> Result<(), UserError> {
        let mut by_name = self.by_name.lock().await;
        if by_name.contains_key(&identity.name) {
            return Err(UserError::Conflict(format!("name '{}'", identity.name)));
        }
        if by_name
            .values()
            .any(|existing| existing.user_handle == identity.user_handle)
        {
            return Err(UserError::Conflict(format!(
                "user handle {}",
                identity.user_handle
            )));
        }
        by_name.insert(identity.name.clone(), identity.clone());
        Ok(())
    }
}
