use std::sync::Arc;

use chrono::Duration;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::UserVerificationRequirement;
use crate::storage::StorageError;

use super::backend::{ChallengeBackend, TakeOutcome};
use super::errors::ChallengeError;
use super::types::{CeremonyKind, Challenge, ChallengeUser, Nonce};

const MAX_ISSUE_ATTEMPTS: usize = 3;

/// Issues single-use nonces and consumes them atomically.
#[derive(Clone)]
pub struct ChallengeStore {
    backend: Arc<dyn ChallengeBackend>,
    clock: Arc<dyn Clock>,
}

impl ChallengeStore {
    pub fn new(backend: Arc<dyn ChallengeBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    pub async fn init(&self) -> Result<(), ChallengeError> {
        Ok(self.backend.init().await?)
    }

    /// Issues a fresh challenge valid for `ttl`.
    ///
    /// The record is retained for one more `ttl` after expiry so that a replay
    /// in that window is reported as `AlreadyUsed` rather than `NotFound`.
    /// Records already past their retention are evicted first.
    pub async fn issue(
        &self,
        kind: CeremonyKind,
        user: Option<ChallengeUser>,
        user_verification: UserVerificationRequirement,
        ttl: Duration,
    ) -> Result<Challenge, ChallengeError> {
        if ttl <= Duration::zero() {
            return Err(ChallengeError::InvalidTtl(format!(
                "{}s is not positive",
                ttl.num_seconds()
            )));
        }

        self.evict_abandoned().await;

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let created_at = self.clock.now();
            let challenge = Challenge {
                nonce: Nonce::generate()?,
                kind,
                user: user.clone(),
                user_verification,
                created_at,
                expires_at: created_at + ttl,
            };

            if self
                .backend
                .put_if_absent(&challenge, challenge.expires_at + ttl)
                .await?
            {
                tracing::debug!(
                    "Issued {} challenge {:?}, expires at {}",
                    kind,
                    challenge.nonce,
                    challenge.expires_at
                );
                return Ok(challenge);
            }

            tracing::warn!("Nonce collision on attempt {}, retrying", attempt);
        }

        Err(ChallengeError::Storage(StorageError::Storage(format!(
            "no unique nonce after {MAX_ISSUE_ATTEMPTS} attempts"
        ))))
    }

    /// Atomically checks and invalidates `nonce`.
    ///
    /// A challenge found past its deadline is burned and reported as `Expired`.
    pub async fn consume(&self, nonce: &Nonce) -> Result<Challenge, ChallengeError> {
        let now = self.clock.now();

        match self.backend.take(nonce, now).await? {
            TakeOutcome::Taken(challenge) if challenge.is_expired(now) => {
                tracing::debug!("Challenge {:?} expired at {}", nonce, challenge.expires_at);
                Err(ChallengeError::Expired)
            }
            TakeOutcome::Taken(challenge) => Ok(challenge),
            TakeOutcome::AlreadyConsumed => Err(ChallengeError::AlreadyUsed),
            TakeOutcome::Missing => Err(ChallengeError::NotFound),
        }
    }

    /// Drops records past their retention before a new one is written, so
    /// challenges that are never answered do not accumulate.
    async fn evict_abandoned(&self) {
        match self.backend.purge_expired(self.clock.now()).await {
            Ok(0) => {}
            Ok(evicted) => tracing::debug!("Evicted {} abandoned challenges", evicted),
            Err(e) => tracing::warn!("Challenge eviction failed: {}", e),
        }
    }

    pub async fn purge_expired(&self) -> Result<u64, ChallengeError> {
        Ok(self.backend.purge_expired(self.clock.now()).await?)
    }

    /// Purges expired records every `period` until the returned handle is aborted.
    pub fn spawn_purge_task(&self, period: std::time::Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!("Purged {} expired challenges", purged),
                    Err(e) => tracing::error!("Challenge purge failed: {}", e),
                }
            }
        })
    }
}
