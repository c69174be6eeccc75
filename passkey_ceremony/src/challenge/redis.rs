use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage::StorageError;

use super::backend::{ChallengeBackend, TakeOutcome};
use super::types::{Challenge, Nonce};

const CHALLENGE_PREFIX: &str = "challenge";
const TOMBSTONE: &str = "consumed";

// Returns the stored value and leaves a tombstone with the same TTL behind.
const TAKE_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if not value then
    return false
end
if value ~= ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[1], 'KEEPTTL')
end
return value
"#;

/// Challenge backend on Redis; retention is delegated to key expiry.
pub struct RedisChallengeBackend {
    client: redis::Client,
    key_prefix: String,
}

impl RedisChallengeBackend {
    pub fn new(client: redis::Client, table_prefix: &str) -> Self {
        Self {
            client,
            key_prefix: format!("{table_prefix}{CHALLENGE_PREFIX}"),
        }
    }

    pub fn open(url: &str, table_prefix: &str) -> Result<Self, StorageError> {
        Ok(Self::new(redis::Client::open(url)?, table_prefix))
    }

    fn make_key(&self, nonce: &Nonce) -> String {
        format!("{}:{}", self.key_prefix, nonce.to_base64url())
    }
}

/// Seconds until `retain_until`, measured from the challenge's creation.
fn ttl_seconds(challenge: &Challenge, retain_until: DateTime<Utc>) -> u64 {
    let millis = (retain_until - challenge.created_at).num_milliseconds().max(1000);
    (millis as u64).div_ceil(1000)
}

fn outcome_from_value(value: Option<String>) -> Result<TakeOutcome, StorageError> {
    match value {
        None => Ok(TakeOutcome::Missing),
        Some(v) if v == TOMBSTONE => Ok(TakeOutcome::AlreadyConsumed),
        Some(v) => Ok(TakeOutcome::Taken(serde_json::from_str(&v)?)),
    }
}

#[async_trait]
impl ChallengeBackend for RedisChallengeBackend {
    async fn init(&self) -> Result<(), StorageError> {
        let _conn = self.client.get_multiplexed_async_connection().await?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        challenge: &Challenge,
        retain_until: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value = serde_json::to_string(challenge)?;

        let stored: Option<String> = redis::cmd("SET")
            .arg(self.make_key(&challenge.nonce))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(challenge, retain_until))
            .query_async(&mut conn)
            .await?;

        Ok(stored.is_some())
    }

    async fn take(&self, nonce: &Nonce, _now: DateTime<Utc>) -> Result<TakeOutcome, StorageError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let value: Option<String> = redis::Script::new(TAKE_SCRIPT)
            .key(self.make_key(nonce))
            .arg(TOMBSTONE)
            .invoke_async(&mut conn)
            .await?;

        outcome_from_value(value)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, StorageError> {
        // Keys carry their own expiry
        Ok(0)
    }
}
