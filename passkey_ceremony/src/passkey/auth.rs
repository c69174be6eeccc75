use crate::challenge::{CeremonyKind, Challenge};
use crate::config::CeremonyConfig;
use crate::credential::{StoredCredential, counter_advances};
use crate::userdb::UserHandle;
use crate::utils::base64url_decode;

use super::auth_data::AuthenticatorData;
use super::client_data::ParsedClientData;
use super::cose::verify_signature;
use super::errors::{CeremonyError, VerificationStep};
use super::types::{AuthenticatorResponse, PUBLIC_KEY_TYPE};

/// What a verified assertion tells the caller about the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VerifiedAssertion {
    pub(crate) counter: u32,
    pub(crate) user_verified: bool,
    pub(crate) backup_state: bool,
}

/// Verifies an authentication response for `credential` against `challenge`.
///
/// The counter is checked here against the stored value, but only the
/// repository's compare-and-swap makes the advance authoritative.
pub(crate) fn verify_assertion(
    auth_response: &AuthenticatorResponse,
    challenge: &Challenge,
    credential: &StoredCredential,
    config: &CeremonyConfig,
) -> Result<VerifiedAssertion, CeremonyError> {
    if auth_response.type_ != PUBLIC_KEY_TYPE {
        return Err(CeremonyError::MalformedRequest(format!(
            "credential type must be '{PUBLIC_KEY_TYPE}', got '{}'",
            auth_response.type_
        )));
    }
    if challenge.kind != CeremonyKind::Authentication {
        return Err(CeremonyError::failed(
            VerificationStep::ClientData,
            format!("challenge was issued for {}", challenge.kind),
        ));
    }

    let raw_id = base64url_decode(&auth_response.raw_id)
        .map_err(|e| CeremonyError::MalformedRequest(format!("rawId: {e}")))?;
    if raw_id != credential.credential_id.as_bytes() {
        return Err(CeremonyError::failed(
            VerificationStep::CredentialLookup,
            "rawId does not match the stored credential",
        ));
    }

    let client_data = ParsedClientData::from_base64(&auth_response.response.client_data_json)?;
    client_data.verify(CeremonyKind::Authentication, &challenge.nonce, config)?;

    let raw_auth_data = base64url_decode(&auth_response.response.authenticator_data)
        .map_err(|e| CeremonyError::MalformedRequest(format!("authenticatorData: {e}")))?;
    let auth_data = AuthenticatorData::parse(&raw_auth_data)?;

    auth_data.verify_rp_id(&config.rp_id)?;
    auth_data.verify_flags(challenge.user_verification)?;

    verify_user_handle(auth_response, challenge, credential)?;

    let signature = base64url_decode(&auth_response.response.signature)
        .map_err(|e| CeremonyError::MalformedRequest(format!("signature: {e}")))?;
    let mut signed_data = Vec::with_capacity(auth_data.raw_data.len() + 32);
    signed_data.extend_from_slice(&auth_data.raw_data);
    signed_data.extend_from_slice(&client_data.hash());
    verify_signature(&credential.public_key, &signed_data, &signature)?;

    if !counter_advances(credential.counter, auth_data.counter) {
        return Err(CeremonyError::CounterRegression {
            stored: credential.counter,
            received: auth_data.counter,
        });
    }

    Ok(VerifiedAssertion {
        counter: auth_data.counter,
        user_verified: auth_data.is_user_verified(),
        backup_state: auth_data.is_backed_up(),
    })
}

/// Binds the assertion to the right user.
///
/// A scoped challenge only accepts that user's credentials. An unscoped one
/// (discoverable credential) must carry the user handle the authenticator stored.
fn verify_user_handle(
    auth_response: &AuthenticatorResponse,
    challenge: &Challenge,
    credential: &StoredCredential,
) -> Result<(), CeremonyError> {
    let presented = auth_response
        .response
        .user_handle
        .as_deref()
        .map(UserHandle::from_base64url)
        .transpose()
        .map_err(|e| CeremonyError::MalformedRequest(format!("userHandle: {e}")))?;

    tracing::debug!(
        "User handle: {:?}, stored handle: {:?}, scoped: {}",
        presented,
        credential.user_handle,
        challenge.user.is_some()
    );

    match (&presented, challenge.user_handle()) {
        (Some(handle), _) if *handle != credential.user_handle => {
            return Err(CeremonyError::failed(
                VerificationStep::UserHandle,
                "user handle does not own this credential",
            ));
        }
        (None, None) => {
            return Err(CeremonyError::failed(
                VerificationStep::UserHandle,
                "missing required user handle for discoverable credential",
            ));
        }
        _ => {}
    }

    if let Some(scoped) = challenge.user_handle() {
        if *scoped != credential.user_handle {
            return Err(CeremonyError::failed(
                VerificationStep::CredentialBinding,
                "credential is not registered to the challenged user",
            ));
        }
    }

    Ok(())
}
