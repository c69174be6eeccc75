use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::userdb::UserHandle;
use crate::utils::{UtilError, base64url_bytes, base64url_decode, base64url_encode};

/// Largest credential id an authenticator may return.
pub const MAX_CREDENTIAL_ID_LEN: usize = 1023;

/// Opaque credential identifier chosen by the authenticator.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(#[serde(with = "base64url_bytes")] Vec<u8>);

impl CredentialId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64url(encoded: &str) -> Result<Self, UtilError> {
        base64url_decode(encoded).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        base64url_encode(&self.0)
    }
}

impl fmt::Debug for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialId({})", self.to_base64url())
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64url())
    }
}

/// COSE signature algorithms accepted for credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CoseAlgorithm {
    /// ECDSA P-256 with SHA-256
    Es256,
    /// Ed25519
    EdDsa,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256,
}

impl CoseAlgorithm {
    pub fn cose_id(&self) -> i64 {
        match self {
            CoseAlgorithm::Es256 => -7,
            CoseAlgorithm::EdDsa => -8,
            CoseAlgorithm::Rs256 => -257,
        }
    }

    pub fn from_cose_id(id: i64) -> Option<Self> {
        match id {
            -7 => Some(CoseAlgorithm::Es256),
            -8 => Some(CoseAlgorithm::EdDsa),
            -257 => Some(CoseAlgorithm::Rs256),
            _ => None,
        }
    }
}

impl TryFrom<i64> for CoseAlgorithm {
    type Error = String;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::from_cose_id(id).ok_or_else(|| format!("unsupported COSE algorithm {id}"))
    }
}

impl From<CoseAlgorithm> for i64 {
    fn from(alg: CoseAlgorithm) -> Self {
        alg.cose_id()
    }
}

/// Credential public key: the authenticator's COSE_Key bytes and their algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPublicKey {
    pub algorithm: CoseAlgorithm,
    #[serde(with = "base64url_bytes")]
    pub cose_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub credential_id: CredentialId,
    pub user_handle: UserHandle,
    pub public_key: CredentialPublicKey,
    pub counter: u32,
    pub aaguid: Uuid,
    /// Attestation statement format the credential was registered with
    pub attestation_format: String,
    pub transports: Vec<String>,
    pub backup_eligible: bool,
    pub backup_state: bool,
    /// Set when a counter regression suggested a cloned authenticator
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Signature counter rule: a zero stored counter means the authenticator does
/// not count, otherwise the received value must strictly increase.
pub fn counter_advances(stored: u32, received: u32) -> bool {
    stored == 0 || received > stored
}
