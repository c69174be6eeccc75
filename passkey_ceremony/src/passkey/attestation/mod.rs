//! Attestation statement verification for the registration path.
//!
//! Formats are a closed set; anything else is reported as
//! [`CeremonyError::UnsupportedAttestationFormat`] unless the configuration
//! explicitly accepts unknown formats as self attestation.

mod none;
mod packed;
mod u2f;
mod utils;

use std::fmt;

use chrono::{DateTime, Utc};
use ciborium::value::Value as CborValue;

use crate::utils::base64url_decode;

use super::auth_data::{AttestedCredentialData, AuthenticatorData};
use super::cose::ParsedCoseKey;
use super::errors::{CeremonyError, VerificationStep};

use none::verify_none_attestation;
use packed::verify_packed_attestation;
use u2f::verify_u2f_attestation;

/// Decoded `attestationObject`.
#[derive(Debug, Clone)]
pub(crate) struct AttestationObject {
    pub(crate) fmt: String,
    pub(crate) auth_data: Vec<u8>,
    pub(crate) att_stmt: Vec<(CborValue, CborValue)>,
}

impl AttestationObject {
    pub(crate) fn from_base64(encoded: &str) -> Result<Self, CeremonyError> {
        let bytes = base64url_decode(encoded).map_err(|e| {
            CeremonyError::MalformedRequest(format!("Failed to decode attestation object: {e}"))
        })?;

        let invalid =
            |reason: String| CeremonyError::failed(VerificationStep::AttestationObject, reason);

        let cbor: CborValue = ciborium::de::from_reader(&bytes[..])
            .map_err(|e| invalid(format!("Invalid CBOR data: {e}")))?;
        let CborValue::Map(map) = cbor else {
            return Err(invalid("attestation object is not a map".to_string()));
        };

        let mut fmt = None;
        let mut auth_data = None;
        let mut att_stmt = None;

        for (key, value) in map {
            if let CborValue::Text(k) = key {
                match (k.as_str(), value) {
                    ("fmt", CborValue::Text(f)) => fmt = Some(f),
                    ("authData", CborValue::Bytes(d)) => auth_data = Some(d),
                    ("attStmt", CborValue::Map(s)) => att_stmt = Some(s),
                    _ => {}
                }
            }
        }

        match (fmt, auth_data, att_stmt) {
            (Some(fmt), Some(auth_data), Some(att_stmt)) => {
                tracing::debug!(
                    "Attestation format: {}, auth data: {} bytes, statement entries: {}",
                    fmt,
                    auth_data.len(),
                    att_stmt.len()
                );
                Ok(Self {
                    fmt,
                    auth_data,
                    att_stmt,
                })
            }
            _ => Err(invalid("missing required attestation data".to_string())),
        }
    }

    pub(crate) fn format(&self) -> AttestationFormat {
        AttestationFormat::from_fmt(&self.fmt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttestationFormat {
    None,
    Packed,
    FidoU2f,
    Unknown(String),
}

impl AttestationFormat {
    pub(crate) fn from_fmt(fmt: &str) -> Self {
        match fmt {
            "none" => AttestationFormat::None,
            "packed" => AttestationFormat::Packed,
            "fido-u2f" => AttestationFormat::FidoU2f,
            other => AttestationFormat::Unknown(other.to_string()),
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        match self {
            AttestationFormat::None => "none",
            AttestationFormat::Packed => "packed",
            AttestationFormat::FidoU2f => "fido-u2f",
            AttestationFormat::Unknown(fmt) => fmt,
        }
    }

    /// Verifies `att_stmt` under this format.
    pub(crate) fn verify(
        &self,
        att_stmt: &[(CborValue, CborValue)],
        ctx: &AttestationContext<'_>,
        accept_unknown: bool,
    ) -> Result<(), CeremonyError> {
        match self {
            AttestationFormat::None => verify_none_attestation(att_stmt),
            AttestationFormat::Packed => verify_packed_attestation(ctx, att_stmt),
            AttestationFormat::FidoU2f => verify_u2f_attestation(ctx, att_stmt),
            AttestationFormat::Unknown(fmt) if accept_unknown => {
                tracing::warn!(
                    "Accepting unknown attestation format '{}' without verification",
                    fmt
                );
                Ok(())
            }
            AttestationFormat::Unknown(fmt) => {
                Err(CeremonyError::UnsupportedAttestationFormat(fmt.clone()))
            }
        }
    }
}

impl fmt::Display for AttestationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a statement verifier needs besides the statement itself.
pub(crate) struct AttestationContext<'a> {
    pub(crate) auth_data: &'a AuthenticatorData,
    pub(crate) attested: &'a AttestedCredentialData,
    pub(crate) client_data_hash: &'a [u8],
    pub(crate) credential_key: &'a ParsedCoseKey,
    /// Certificates are judged valid at this instant
    pub(crate) now: DateTime<Utc>,
}

impl AttestationContext<'_> {
    /// `authenticatorData || clientDataHash`
    pub(crate) fn signed_data(&self) -> Vec<u8> {
        let mut signed =
            Vec::with_capacity(self.auth_data.raw_data.len() + self.client_data_hash.len());
        signed.extend_from_slice(&self.auth_data.raw_data);
        signed.extend_from_slice(self.client_data_hash);
        signed
    }

    pub(crate) fn aaguid(&self) -> [u8; 16] {
        self.attested.aaguid
    }

    pub(crate) fn credential_id(&self) -> &[u8] {
        &self.attested.credential_id
    }
}
