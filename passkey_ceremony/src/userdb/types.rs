use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{
    UtilError, base64url_bytes, base64url_decode, base64url_encode, gen_random_bytes,
};

/// Length of generated user handles, in bytes.
pub const USER_HANDLE_LEN: usize = 32;

/// Upper bound WebAuthn places on a user handle.
pub const MAX_USER_HANDLE_LEN: usize = 64;

/// Opaque, never-reused identifier for a user, distinct from the human-readable name.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserHandle(#[serde(with = "base64url_bytes")] Vec<u8>);

impl UserHandle {
    /// Draws a fresh random handle.
    pub fn generate() -> Result<Self, UtilError> {
        Ok(Self(gen_random_bytes(USER_HANDLE_LEN)?))
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
}

impl fmt::Debug for UserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserHandle({})", self.to_base64url())
    }
}

impl fmt::Display for UserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64url())
    }
}

/// Durable user record bound to a user handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserIdentity {
    pub user_handle: UserHandle,
    /// Unique human-readable name, used for lookup before a handle is known
    pub name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl UserIdentity {
    pub fn new(
        user_handle: UserHandle,
        name: impl Into<String>,
        display_name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_handle,
            name: name.into(),
            display_name: display_name.into(),
            created_at,
        }
    }
}
