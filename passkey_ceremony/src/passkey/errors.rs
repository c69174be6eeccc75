use std::fmt;

use thiserror::Error;

use crate::challenge::ChallengeError;
use crate::config::ConfigError;
use crate::credential::CredentialError;
use crate::storage::StorageError;
use crate::userdb::UserError;
use crate::utils::UtilError;

/// The verification step at which a ceremony failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStep {
    ClientData,
    AttestationObject,
    RpIdHash,
    Flags,
    AttestedCredentialData,
    AttestationStatement,
    CredentialLookup,
    CredentialBinding,
    UserHandle,
    Signature,
    Counter,
}

impl fmt::Display for VerificationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerificationStep::ClientData => "client data",
            VerificationStep::AttestationObject => "attestation object",
            VerificationStep::RpIdHash => "rpId hash",
            VerificationStep::Flags => "authenticator flags",
            VerificationStep::AttestedCredentialData => "attested credential data",
            VerificationStep::AttestationStatement => "attestation statement",
            VerificationStep::CredentialLookup => "credential lookup",
            VerificationStep::CredentialBinding => "credential binding",
            VerificationStep::UserHandle => "user handle",
            VerificationStep::Signature => "signature",
            VerificationStep::Counter => "signature counter",
        };
        f.write_str(name)
    }
}

/// Errors reported by ceremony operations.
///
/// Verification failures never leave partial state behind: stores are only
/// written after every check has passed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CeremonyError {
    /// Bad encoding or missing fields in the request
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Challenge not found")]
    ChallengeNotFound,

    #[error("Challenge expired")]
    ChallengeExpired,

    #[error("Challenge already used")]
    ChallengeAlreadyUsed,

    #[error("Origin not allowed: {0}")]
    OriginMismatch(String),

    #[error("RP ID hash mismatch")]
    RpIdMismatch,

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// The authenticator reported a counter that did not advance; possibly cloned
    #[error("Possible cloned authenticator: counter {received} does not advance stored {stored}")]
    CounterRegression { stored: u32, received: u32 },

    #[error("Duplicate credential: {0}")]
    DuplicateCredential(String),

    #[error("Credential not found")]
    CredentialNotFound,

    #[error("Credential flagged as possibly cloned: {0}")]
    CredentialFlagged(String),

    #[error("Unsupported attestation format: {0}")]
    UnsupportedAttestationFormat(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Verification failed at {step}: {reason}")]
    VerificationFailed {
        step: VerificationStep,
        reason: String,
    },

    /// The name is bound to a different user handle than the ceremony used
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl CeremonyError {
    pub(crate) fn failed(step: VerificationStep, reason: impl Into<String>) -> Self {
        CeremonyError::VerificationFailed {
            step,
            reason: reason.into(),
        }
    }

    /// The verification step this error belongs to, if it is a verification failure.
    pub fn step(&self) -> Option<VerificationStep> {
        match self {
            CeremonyError::VerificationFailed { step, .. } => Some(*step),
            CeremonyError::OriginMismatch(_) => Some(VerificationStep::ClientData),
            CeremonyError::RpIdMismatch => Some(VerificationStep::RpIdHash),
            CeremonyError::SignatureInvalid(_) => Some(VerificationStep::Signature),
            CeremonyError::CounterRegression { .. } => Some(VerificationStep::Counter),
            CeremonyError::CredentialNotFound | CeremonyError::CredentialFlagged(_) => {
                Some(VerificationStep::CredentialLookup)
            }
            CeremonyError::UnsupportedAttestationFormat(_) => {
                Some(VerificationStep::AttestationStatement)
            }
            CeremonyError::UnsupportedAlgorithm(_) => {
                Some(VerificationStep::AttestedCredentialData)
            }
            CeremonyError::DuplicateCredential(_) | CeremonyError::IdentityConflict(_) => {
                Some(VerificationStep::CredentialBinding)
            }
            _ => None,
        }
    }

    /// True for errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            CeremonyError::Storage(_) | CeremonyError::Config(_) | CeremonyError::Crypto(_)
        )
    }

    /// True if the caller should issue a fresh challenge instead of retrying.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            CeremonyError::ChallengeNotFound
                | CeremonyError::ChallengeExpired
                | CeremonyError::ChallengeAlreadyUsed
                | CeremonyError::IdentityConflict(_)
        )
    }

    /// True for rejections worth an audit trail.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            CeremonyError::OriginMismatch(_)
                | CeremonyError::RpIdMismatch
                | CeremonyError::CounterRegression { .. }
                | CeremonyError::CredentialFlagged(_)
                | CeremonyError::DuplicateCredential(_)
        )
    }
}

impl From<ChallengeError> for CeremonyError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::NotFound => CeremonyError::ChallengeNotFound,
            ChallengeError::Expired => CeremonyError::ChallengeExpired,
            ChallengeError::AlreadyUsed => CeremonyError::ChallengeAlreadyUsed,
            ChallengeError::InvalidTtl(msg) => CeremonyError::Config(msg),
            ChallengeError::Crypto(msg) => CeremonyError::Crypto(msg),
            ChallengeError::Storage(e) => CeremonyError::Storage(e.to_string()),
        }
    }
}

impl From<CredentialError> for CeremonyError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotFound => CeremonyError::CredentialNotFound,
            CredentialError::Duplicate(id) => CeremonyError::DuplicateCredential(id),
            CredentialError::CounterRegression { stored, received } => {
                CeremonyError::CounterRegression { stored, received }
            }
            CredentialError::Storage(msg) | CredentialError::InvalidData(msg) => {
                CeremonyError::Storage(msg)
            }
        }
    }
}

impl From<UserError> for CeremonyError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Conflict(msg) => CeremonyError::IdentityConflict(msg),
            UserError::Crypto(msg) => CeremonyError::Crypto(msg),
            other => CeremonyError::Storage(other.to_string()),
        }
    }
}

impl From<StorageError> for CeremonyError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Config(msg) => CeremonyError::Config(msg),
            other => CeremonyError::Storage(other.to_string()),
        }
    }
}

impl From<ConfigError> for CeremonyError {
    fn from(err: ConfigError) -> Self {
        CeremonyError::Config(err.to_string())
    }
}

impl From<UtilError> for CeremonyError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::Crypto(msg) => CeremonyError::Crypto(msg),
            UtilError::Format(msg) => CeremonyError::MalformedRequest(msg),
        }
    }
}
