use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::challenge::{CeremonyKind, Challenge};
use crate::config::CeremonyConfig;
use crate::credential::{CredentialId, CredentialPublicKey, StoredCredential};
use crate::utils::base64url_decode;

use super::attestation::{AttestationContext, AttestationObject};
use super::auth_data::AuthenticatorData;
use super::client_data::ParsedClientData;
use super::cose::parse_cose_key;
use super::errors::{CeremonyError, VerificationStep};
use super::types::{PUBLIC_KEY_TYPE, RegisterCredential};

/// Verifies a registration response against the challenge it answers.
///
/// Pure: nothing is stored. On success the returned credential is ready to be
/// inserted for the challenge's user, with the counter the authenticator reported.
pub(crate) fn verify_registration(
    reg_data: &RegisterCredential,
    challenge: &Challenge,
    config: &CeremonyConfig,
    now: DateTime<Utc>,
) -> Result<StoredCredential, CeremonyError> {
    if reg_data.type_ != PUBLIC_KEY_TYPE {
        return Err(CeremonyError::MalformedRequest(format!(
            "credential type must be '{PUBLIC_KEY_TYPE}', got '{}'",
            reg_data.type_
        )));
    }
    if challenge.kind != CeremonyKind::Registration {
        return Err(CeremonyError::failed(
            VerificationStep::ClientData,
            format!("challenge was issued for {}", challenge.kind),
        ));
    }
    let user = challenge.user.as_ref().ok_or_else(|| {
        CeremonyError::failed(
            VerificationStep::UserHandle,
            "registration challenge is not bound to a user",
        )
    })?;

    let client_data = ParsedClientData::from_base64(&reg_data.response.client_data_json)?;
    client_data.verify(CeremonyKind::Registration, &challenge.nonce, config)?;

    let attestation = AttestationObject::from_base64(&reg_data.response.attestation_object)?;
    let auth_data = AuthenticatorData::parse(&attestation.auth_data)?;
    tracing::debug!(
        "Registration authenticator data: flags={:02x}, counter={}",
        auth_data.flags,
        auth_data.counter
    );

    auth_data.verify_rp_id(&config.rp_id)?;
    auth_data.verify_flags(challenge.user_verification)?;

    let attested = auth_data.attested_credential_data.as_ref().ok_or_else(|| {
        CeremonyError::failed(
            VerificationStep::AttestedCredentialData,
            "no attested credential data in registration response",
        )
    })?;

    let raw_id = base64url_decode(&reg_data.raw_id)
        .map_err(|e| CeremonyError::MalformedRequest(format!("rawId: {e}")))?;
    if raw_id != attested.credential_id {
        return Err(CeremonyError::failed(
            VerificationStep::AttestedCredentialData,
            "rawId does not match the attested credential id",
        ));
    }

    let credential_key = parse_cose_key(&attested.public_key)?;
    if !config.algorithms.contains(&credential_key.algorithm) {
        return Err(CeremonyError::UnsupportedAlgorithm(format!(
            "{:?} was not offered for this ceremony",
            credential_key.algorithm
        )));
    }

    let format = attestation.format();
    let client_data_hash = client_data.hash();
    let ctx = AttestationContext {
        auth_data: &auth_data,
        attested,
        client_data_hash: &client_data_hash,
        credential_key: &credential_key,
        now,
    };
    format.verify(&attestation.att_stmt, &ctx, config.accept_unknown_attestation)?;
    tracing::debug!("Attestation statement verified: format={}", format);

    Ok(StoredCredential {
        credential_id: CredentialId::from_bytes(attested.credential_id.clone()),
        user_handle: user.user_handle.clone(),
        public_key: CredentialPublicKey {
            algorithm: credential_key.algorithm,
            cose_key: attested.public_key.clone(),
        },
        counter: auth_data.counter,
        aaguid: Uuid::from_bytes(attested.aaguid),
        attestation_format: format.to_string(),
        transports: reg_data.response.transports.clone(),
        backup_eligible: auth_data.is_backup_eligible(),
        backup_state: auth_data.is_backed_up(),
        flagged: false,
        created_at: now,
        last_used_at: None,
    })
}
