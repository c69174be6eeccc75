//! passkey_ceremony - WebAuthn/FIDO2 credential ceremony engine
//!
//! Issues single-use challenges, verifies registration (attestation) and
//! authentication (assertion) responses, and keeps the credential store
//! invariants that make replayed responses and cloned authenticators
//! detectable. Transport, sessions and UI are left to the host.

mod challenge;
mod clock;
mod config;
mod coordination;
mod credential;
mod passkey;
mod storage;
mod userdb;
mod utils;

#[cfg(test)]
mod test_utils;

/// `tracing` target for security-relevant rejections.
pub(crate) const AUDIT_TARGET: &str = "passkey_ceremony::audit";

pub use challenge::{
    CeremonyKind, Challenge, ChallengeBackend, ChallengeError, ChallengeStore, ChallengeUser,
    InMemoryChallengeBackend, NONCE_LEN, Nonce, RedisChallengeBackend, SqliteChallengeBackend,
    TakeOutcome,
};

pub use clock::{Clock, ManualClock, SystemClock};

pub use config::{
    AttestationConveyance, AuthenticatorAttachment, CeremonyConfig, CeremonyPolicy, ConfigError,
    ResidentKeyRequirement, UserVerificationRequirement,
};

pub use coordination::{CeremonyState, PasskeyCeremony};

pub use credential::{
    CoseAlgorithm, CredentialError, CredentialId, CredentialPublicKey, CredentialRepository,
    InMemoryCredentialRepository, MAX_CREDENTIAL_ID_LEN, SqliteCredentialRepository,
    StoredCredential, counter_advances,
};

pub use passkey::{
    AuthenticationOptions, AuthenticatorAssertionResponse, AuthenticatorAttestationResponse,
    AuthenticatorResponse, AuthenticatorSelection, CeremonyError, CredentialDescriptor,
    PubKeyCredParam, PublicKeyCredentialUserEntity, RegisterCredential, RegistrationOptions,
    RelyingParty, VerificationStep,
};

pub use storage::{CacheStoreKind, DataStoreKind, StorageError, StoreSettings, open_sqlite_pool};

pub use userdb::{
    IdentityStore, InMemoryIdentityStore, MAX_USER_HANDLE_LEN, SqliteIdentityStore,
    USER_HANDLE_LEN, UserError, UserHandle, UserIdentity,
};

pub use utils::UtilError;
