use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::config::UserVerificationRequirement;
use crate::userdb::UserHandle;
use crate::utils::{
    UtilError, base64url_bytes, base64url_decode, base64url_encode, gen_random_bytes,
};

/// Nonce size in bytes (256 bits).
pub const NONCE_LEN: usize = 32;

/// Server-issued random challenge bytes.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(#[serde(with = "base64url_bytes")] Vec<u8>);

impl Nonce {
    pub fn generate() -> Result<Self, UtilError> {
        Ok(Self(gen_random_bytes(NONCE_LEN)?))
    }

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

    /// Constant-time comparison against bytes echoed back by a client.
    pub fn matches(&self, presented: &[u8]) -> bool {
        self.0.len() == presented.len() && bool::from(self.0.as_slice().ct_eq(presented))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.to_base64url())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

impl CeremonyKind {
    /// The `type` member client data must carry for this ceremony.
    pub fn client_data_type(&self) -> &'static str {
        match self {
            CeremonyKind::Registration => "webauthn.create",
            CeremonyKind::Authentication => "webauthn.get",
        }
    }
}

impl fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CeremonyKind::Registration => f.write_str("registration"),
            CeremonyKind::Authentication => f.write_str("authentication"),
        }
    }
}

/// The user a challenge is scoped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeUser {
    pub user_handle: UserHandle,
    pub name: String,
    pub display_name: String,
}

/// One outstanding ceremony nonce and what it is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub nonce: Nonce,
    pub kind: CeremonyKind,
    /// `None` for discoverable-credential authentication
    pub user: Option<ChallengeUser>,
    pub user_verification: UserVerificationRequirement,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn user_handle(&self) -> Option<&UserHandle> {
        self.user.as_ref().map(|u| &u.user_handle)
    }
}
