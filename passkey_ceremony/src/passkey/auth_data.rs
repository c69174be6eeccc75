use std::io::Cursor;

use ciborium::value::Value as CborValue;

use crate::AUDIT_TARGET;
use crate::config::UserVerificationRequirement;
use crate::credential::MAX_CREDENTIAL_ID_LEN;
use crate::utils::sha256;

use super::errors::{CeremonyError, VerificationStep};

/// Flags for AuthenticatorData as defined in WebAuthn Level 2
pub(crate) mod flags {
    /// User Present (UP) - Bit 0
    pub(crate) const UP: u8 = 1 << 0;
    /// User Verified (UV) - Bit 2
    pub(crate) const UV: u8 = 1 << 2;
    /// Backup Eligibility (BE) - Bit 3
    pub(crate) const BE: u8 = 1 << 3;
    /// Backup State (BS) - Bit 4
    pub(crate) const BS: u8 = 1 << 4;
    /// Attested Credential Data Present - Bit 6
    pub(crate) const AT: u8 = 1 << 6;
    /// Extension Data Present - Bit 7
    pub(crate) const ED: u8 = 1 << 7;
}

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const AAGUID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AttestedCredentialData {
    pub(crate) aaguid: [u8; AAGUID_LEN],
    pub(crate) credential_id: Vec<u8>,
    /// The credential public key exactly as encoded by the authenticator
    pub(crate) public_key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct AuthenticatorData {
    pub(crate) rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub(crate) flags: u8,
    pub(crate) counter: u32,
    pub(crate) attested_credential_data: Option<AttestedCredentialData>,
    pub(crate) extensions: Option<CborValue>,
    pub(crate) raw_data: Vec<u8>,
}

impl AuthenticatorData {
    /// Parses authenticator data.
    ///
    /// Layout: rpIdHash (32) | flags (1) | signCount (4, big-endian)
    /// | attested credential data (if AT) | extensions CBOR map (if ED).
    /// Bytes beyond what the flags announce are rejected.
    pub(crate) fn parse(data: &[u8]) -> Result<Self, CeremonyError> {
        if data.len() < HEADER_LEN {
            return Err(CeremonyError::MalformedRequest(format!(
                "authenticator data too short: {} bytes",
                data.len()
            )));
        }

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&data[..RP_ID_HASH_LEN]);
        let flags = data[32];
        let counter = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let mut pos = HEADER_LEN;

        let attested_credential_data = if flags & flags::AT != 0 {
            let (attested, consumed) = parse_attested_credential_data(&data[pos..])?;
            pos += consumed;
            Some(attested)
        } else {
            None
        };

        let extensions = if flags & flags::ED != 0 {
            let mut cursor = Cursor::new(&data[pos..]);
            let value: CborValue = ciborium::de::from_reader(&mut cursor).map_err(|e| {
                CeremonyError::MalformedRequest(format!("invalid extensions CBOR: {e}"))
            })?;
            if !value.is_map() {
                return Err(CeremonyError::MalformedRequest(
                    "extensions must be a CBOR map".to_string(),
                ));
            }
            pos += cursor.position() as usize;
            Some(value)
        } else {
            None
        };

        if pos != data.len() {
            return Err(CeremonyError::MalformedRequest(format!(
                "{} trailing bytes in authenticator data",
                data.len() - pos
            )));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            counter,
            attested_credential_data,
            extensions,
            raw_data: data.to_vec(),
        })
    }

    pub(crate) fn is_user_present(&self) -> bool {
        (self.flags & flags::UP) != 0
    }

    pub(crate) fn is_user_verified(&self) -> bool {
        (self.flags & flags::UV) != 0
    }

    pub(crate) fn is_backup_eligible(&self) -> bool {
        (self.flags & flags::BE) != 0
    }

    pub(crate) fn is_backed_up(&self) -> bool {
        (self.flags & flags::BS) != 0
    }

    pub(crate) fn verify_rp_id(&self, rp_id: &str) -> Result<(), CeremonyError> {
        if self.rp_id_hash != sha256(rp_id.as_bytes()) {
            tracing::warn!(
                target: AUDIT_TARGET,
                rp_id = %rp_id,
                "Rejected authenticator data scoped to a different rpId"
            );
            return Err(CeremonyError::RpIdMismatch);
        }
        Ok(())
    }

    pub(crate) fn verify_flags(
        &self,
        user_verification: UserVerificationRequirement,
    ) -> Result<(), CeremonyError> {
        if !self.is_user_present() {
            return Err(CeremonyError::failed(
                VerificationStep::Flags,
                "user not present",
            ));
        }

        if user_verification == UserVerificationRequirement::Required && !self.is_user_verified() {
            return Err(CeremonyError::failed(
                VerificationStep::Flags,
                format!(
                    "user verification required but flag not set. Flags: {:02x}",
                    self.flags
                ),
            ));
        }

        if self.is_backed_up() && !self.is_backup_eligible() {
            return Err(CeremonyError::failed(
                VerificationStep::Flags,
                "backup state set on a credential that is not backup eligible",
            ));
        }

        tracing::debug!(
            "Flags: UP={}, UV={}, BE={}, BS={}, AT={}, ED={}",
            self.is_user_present(),
            self.is_user_verified(),
            self.is_backup_eligible(),
            self.is_backed_up(),
            self.attested_credential_data.is_some(),
            self.extensions.is_some()
        );
        Ok(())
    }
}

/// Returns the attested credential data and the number of bytes it occupied.
fn parse_attested_credential_data(
    data: &[u8],
) -> Result<(AttestedCredentialData, usize), CeremonyError> {
    let malformed =
        |reason: String| CeremonyError::failed(VerificationStep::AttestedCredentialData, reason);

    if data.len() < AAGUID_LEN + 2 {
        return Err(malformed("attested credential data truncated".to_string()));
    }

    let mut aaguid = [0u8; AAGUID_LEN];
    aaguid.copy_from_slice(&data[..AAGUID_LEN]);

    let id_len = u16::from_be_bytes([data[AAGUID_LEN], data[AAGUID_LEN + 1]]) as usize;
    if id_len == 0 || id_len > MAX_CREDENTIAL_ID_LEN {
        return Err(malformed(format!("invalid credential id length {id_len}")));
    }

    let id_start = AAGUID_LEN + 2;
    let key_start = id_start + id_len;
    if data.len() <= key_start {
        return Err(malformed("credential id or public key truncated".to_string()));
    }

    let mut cursor = Cursor::new(&data[key_start..]);
    let _: CborValue = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| malformed(format!("invalid credential public key CBOR: {e}")))?;
    let key_len = cursor.position() as usize;

    Ok((
        AttestedCredentialData {
            aaguid,
            credential_id: data[id_start..key_start].to_vec(),
            public_key: data[key_start..key_start + key_len].to_vec(),
        },
        key_start + key_len,
    ))
}
