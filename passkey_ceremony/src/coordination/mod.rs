//! Ceremony orchestration: challenge issuance, response verification and
//! the store mutations that follow a successful verification.

mod authentication;
mod registration;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::challenge::{
    CeremonyKind, ChallengeBackend, ChallengeStore, InMemoryChallengeBackend,
    RedisChallengeBackend, SqliteChallengeBackend,
};
use crate::clock::{Clock, SystemClock};
use crate::config::CeremonyConfig;
use crate::credential::{
    CredentialId, CredentialRepository, InMemoryCredentialRepository, SqliteCredentialRepository,
    StoredCredential,
};
use crate::passkey::{CeremonyError, CredentialDescriptor, PUBLIC_KEY_TYPE};
use crate::storage::{
    CacheStoreKind, DataStoreKind, StorageError, StoreSettings, open_sqlite_pool,
};
use crate::userdb::{InMemoryIdentityStore, IdentityStore, SqliteIdentityStore, UserIdentity};

/// Observable states of a ceremony, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    Issued,
    Verified,
    Failed,
    Expired,
}

impl fmt::Display for CeremonyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CeremonyState::Issued => "issued",
            CeremonyState::Verified => "verified",
            CeremonyState::Failed => "failed",
            CeremonyState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Runs registration and authentication ceremonies against injected stores.
///
/// Cloning is cheap; clones share the same stores.
#[derive(Clone)]
pub struct PasskeyCeremony {
    config: Arc<CeremonyConfig>,
    challenges: ChallengeStore,
    credentials: Arc<dyn CredentialRepository>,
    identities: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
}

impl PasskeyCeremony {
    pub fn new(
        config: CeremonyConfig,
        challenges: ChallengeStore,
        credentials: Arc<dyn CredentialRepository>,
        identities: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            challenges,
            credentials,
            identities,
            clock,
        }
    }

    /// All stores in process memory, on the system clock.
    pub fn in_memory(config: CeremonyConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::new(
            config,
            ChallengeStore::new(Arc::new(InMemoryChallengeBackend::new()), clock.clone()),
            Arc::new(InMemoryCredentialRepository::new()),
            Arc::new(InMemoryIdentityStore::new()),
            clock,
        )
    }

    /// Builds the stores named by `settings`. Call [`init`](Self::init) before use.
    pub fn from_settings(
        config: CeremonyConfig,
        settings: &StoreSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CeremonyError> {
        let prefix = settings.table_prefix.as_str();

        let (credentials, identities): (Arc<dyn CredentialRepository>, Arc<dyn IdentityStore>) =
            match &settings.data_store {
                DataStoreKind::Memory => (
                    Arc::new(InMemoryCredentialRepository::new()),
                    Arc::new(InMemoryIdentityStore::new()),
                ),
                DataStoreKind::Sqlite(url) => {
                    let pool = open_sqlite_pool(url)?;
                    (
                        Arc::new(SqliteCredentialRepository::new(pool.clone(), prefix)),
                        Arc::new(SqliteIdentityStore::new(pool, prefix)),
                    )
                }
            };

        let backend: Arc<dyn ChallengeBackend> = match &settings.cache_store {
            CacheStoreKind::Memory => Arc::new(InMemoryChallengeBackend::new()),
            CacheStoreKind::Sqlite(url) => {
                Arc::new(SqliteChallengeBackend::new(open_sqlite_pool(url)?, prefix))
            }
            CacheStoreKind::Redis(url) => Arc::new(RedisChallengeBackend::open(url, prefix)?),
        };

        tracing::info!("Ceremony stores opened with table prefix {}", prefix);

        Ok(Self::new(
            config,
            ChallengeStore::new(backend, clock.clone()),
            credentials,
            identities,
            clock,
        ))
    }

    /// Configuration and stores from the environment (`.env` honoured).
    pub fn from_env() -> Result<Self, CeremonyError> {
        let config = CeremonyConfig::from_env()?;
        let settings = StoreSettings::from_env()?;
        Self::from_settings(config, &settings, Arc::new(SystemClock))
    }

    /// Creates and validates backing tables.
    pub async fn init(&self) -> Result<(), CeremonyError> {
        self.challenges.init().await?;
        self.credentials.init().await?;
        self.identities.init().await?;
        Ok(())
    }

    pub fn config(&self) -> &CeremonyConfig {
        &self.config
    }

    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    /// The identity owning `credential_id`, if registered.
    pub async fn find_identity_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> Result<Option<UserIdentity>, CeremonyError> {
        let Some(credential) = self
            .within(
                "find credential",
                self.credentials.find_by_credential_id(credential_id),
            )
            .await?
        else {
            return Ok(None);
        };

        self.within(
            "find identity",
            self.identities.find_by_handle(&credential.user_handle),
        )
        .await
    }

    /// Credentials registered by the identity named `name`; empty if unknown.
    pub async fn list_credentials(
        &self,
        name: &str,
    ) -> Result<Vec<StoredCredential>, CeremonyError> {
        let Some(identity) = self
            .within("find identity", self.identities.find_by_name(name))
            .await?
        else {
            return Ok(Vec::new());
        };

        self.within(
            "list credentials",
            self.credentials.find_by_user_handle(&identity.user_handle),
        )
        .await
    }

    /// Awaits a store call under the configured storage deadline.
    async fn within<T, E>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, CeremonyError>
    where
        CeremonyError: From<E>,
    {
        match tokio::time::timeout(self.config.storage_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = CeremonyError::from(e);
                if let CeremonyError::Storage(reason) = &err {
                    tracing::error!("Storage failure during {}: {}", operation, reason);
                }
                Err(err)
            }
            Err(_) => {
                tracing::error!(
                    "{} timed out after {:?}",
                    operation,
                    self.config.storage_timeout
                );
                Err(<CeremonyError as From<StorageError>>::from(StorageError::Timeout(operation.to_string())))
            }
        }
    }
}

fn descriptors(credentials: &[StoredCredential]) -> Vec<CredentialDescriptor> {
    credentials
        .iter()
        .map(|c| CredentialDescriptor {
            type_: PUBLIC_KEY_TYPE.to_string(),
            id: c.credential_id.to_base64url(),
            transports: c.transports.clone(),
        })
        .collect()
}

fn log_outcome(kind: CeremonyKind, result: &Result<UserIdentity, CeremonyError>) {
    match result {
        Ok(identity) => tracing::info!(
            state = %CeremonyState::Verified,
            ceremony = %kind,
            user_handle = %identity.user_handle,
            "Ceremony verified for {}",
            identity.name
        ),
        Err(CeremonyError::ChallengeExpired) => tracing::info!(
            state = %CeremonyState::Expired,
            ceremony = %kind,
            "Ceremony challenge expired"
        ),
        Err(e) => tracing::warn!(
            state = %CeremonyState::Failed,
            ceremony = %kind,
            step = ?e.step(),
            "Ceremony failed: {}",
            e
        ),
    }
}
