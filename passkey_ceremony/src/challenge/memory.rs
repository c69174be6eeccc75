use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::storage::StorageError;

use super::backend::{ChallengeBackend, TakeOutcome};
use super::types::{Challenge, Nonce};

enum Slot {
    Pending(Challenge),
    Consumed,
}

struct Entry {
    slot: Slot,
    retain_until: DateTime<Utc>,
}

/// Challenge backend kept in process memory.
#[derive(Default)]
pub struct InMemoryChallengeBackend {
    entries: Mutex<HashMap<Nonce, Entry>>,
}

impl InMemoryChallengeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeBackend for InMemoryChallengeBackend {
    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn put_if_absent(
        &self,
        challenge: &Challenge,
        retain_until: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&challenge.nonce) {
            return Ok(false);
        }
        entries.insert(
            challenge.nonce.clone(),
            Entry {
                slot: Slot::Pending(challenge.clone()),
                retain_until,
            },
        );
        Ok(true)
    }

    async fn take(&self, nonce: &Nonce, now: DateTime<Utc>) -> Result<TakeOutcome, StorageError> {
        let mut entries = self.entries.lock().await;

        let Some(entry) = entries.get_mut(nonce) else {
            return Ok(TakeOutcome::Missing);
        };

        if entry.retain_until <= now {
            entries.remove(nonce);
            return Ok(TakeOutcome::Missing);
        }

        match std::mem::replace(&mut entry.slot, Slot::Consumed) {
            Slot::Pending(challenge) => Ok(TakeOutcome::Taken(challenge)),
            Slot::Consumed => Ok(TakeOutcome::AlreadyConsumed),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.retain_until > now);
        Ok((before - entries.len()) as u64)
    }
}
