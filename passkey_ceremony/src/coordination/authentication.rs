use crate::AUDIT_TARGET;
use crate::challenge::{CeremonyKind, ChallengeUser};
use crate::credential::{CredentialId, StoredCredential};
use crate::passkey::{
    AuthenticationOptions, AuthenticatorResponse, CeremonyError, ParsedClientData,
    verify_assertion,
};
use crate::userdb::{UserHandle, UserIdentity};

use super::{CeremonyState, PasskeyCeremony, descriptors, log_outcome};

impl PasskeyCeremony {
    /// Issues an authentication challenge.
    ///
    /// With a name the challenge is scoped to that identity and lists its
    /// credentials. An unknown name gets a challenge scoped to a random handle
    /// and an empty list, indistinguishable from a user without credentials.
    /// Without a name the challenge is unscoped (discoverable credentials).
    pub async fn begin_authentication(
        &self,
        name: Option<&str>,
    ) -> Result<AuthenticationOptions, CeremonyError> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        let (user, allowed) = match name {
            Some(name) => {
                match self
                    .within("find identity", self.identities.find_by_name(name))
                    .await?
                {
                    Some(identity) => {
                        let credentials = self
                            .within(
                                "list credentials",
                                self.credentials.find_by_user_handle(&identity.user_handle),
                            )
                            .await?;
                        let user = ChallengeUser {
                            user_handle: identity.user_handle,
                            name: identity.name,
                            display_name: identity.display_name,
                        };
                        (Some(user), descriptors(&credentials))
                    }
                    None => {
                        tracing::debug!("No identity named {}, scoping challenge to a decoy", name);
                        let decoy = ChallengeUser {
                            user_handle: UserHandle::generate()?,
                            name: name.to_string(),
                            display_name: name.to_string(),
                        };
                        (Some(decoy), Vec::new())
                    }
                }
            }
            None => (None, Vec::new()),
        };

        let challenge = self
            .within(
                "issue challenge",
                self.challenges.issue(
                    CeremonyKind::Authentication,
                    user,
                    self.config.policy.user_verification,
                    self.config.challenge_ttl,
                ),
            )
            .await?;

        tracing::info!(
            state = %CeremonyState::Issued,
            ceremony = %CeremonyKind::Authentication,
            scoped = challenge.user.is_some(),
            "Authentication challenge issued"
        );

        Ok(AuthenticationOptions {
            challenge: challenge.nonce.to_base64url(),
            timeout: self.config.client_timeout.as_millis() as u64,
            rp_id: self.config.rp_id.clone(),
            allow_credentials: allowed,
            user_verification: challenge.user_verification,
        })
    }

    /// Verifies an authentication response and advances the credential's counter.
    ///
    /// A counter that fails to advance flags the credential as a suspected
    /// clone and fails the ceremony with `CounterRegression`.
    pub async fn finish_authentication(
        &self,
        auth_response: &AuthenticatorResponse,
    ) -> Result<UserIdentity, CeremonyError> {
        let result = self.try_finish_authentication(auth_response).await;
        log_outcome(CeremonyKind::Authentication, &result);
        result
    }

    async fn try_finish_authentication(
        &self,
        auth_response: &AuthenticatorResponse,
    ) -> Result<UserIdentity, CeremonyError> {
        let client_data = ParsedClientData::from_base64(&auth_response.response.client_data_json)?;
        let challenge = self
            .within("consume challenge", self.challenges.consume(&client_data.nonce()))
            .await?;

        let credential_id = CredentialId::from_base64url(&auth_response.raw_id)
            .map_err(|e| CeremonyError::MalformedRequest(format!("rawId: {e}")))?;
        let credential = self
            .within(
                "find credential",
                self.credentials.find_by_credential_id(&credential_id),
            )
            .await?
            .ok_or_else(|| {
                tracing::debug!("Unknown credential {}", credential_id);
                CeremonyError::CredentialNotFound
            })?;

        if credential.flagged && self.config.reject_flagged_credentials {
            tracing::warn!(
                target: AUDIT_TARGET,
                credential_id = %credential.credential_id,
                "Refused flagged credential"
            );
            return Err(CeremonyError::CredentialFlagged(
                credential.credential_id.to_base64url(),
            ));
        }

        let verified = match verify_assertion(auth_response, &challenge, &credential, &self.config)
        {
            Ok(verified) => verified,
            Err(CeremonyError::CounterRegression { stored, received }) => {
                return Err(self.counter_regression(&credential, stored, received).await);
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now();
        match self
            .within(
                "advance counter",
                self.credentials
                    .increment_counter(&credential.credential_id, verified.counter, now),
            )
            .await
        {
            Ok(()) => {}
            Err(CeremonyError::CounterRegression { stored, received }) => {
                return Err(self.counter_regression(&credential, stored, received).await);
            }
            Err(e) => return Err(e),
        }

        tracing::debug!(
            "Credential {} used: counter={}, user_verified={}, backed_up={}",
            credential.credential_id,
            verified.counter,
            verified.user_verified,
            verified.backup_state
        );

        self.within(
            "find identity",
            self.identities.find_by_handle(&credential.user_handle),
        )
        .await?
        .ok_or_else(|| {
            CeremonyError::Storage(format!(
                "credential {} has no owning identity",
                credential.credential_id
            ))
        })
    }

    /// Flags `credential` as a suspected clone and returns the ceremony error.
    async fn counter_regression(
        &self,
        credential: &StoredCredential,
        stored: u32,
        received: u32,
    ) -> CeremonyError {
        tracing::warn!(
            target: AUDIT_TARGET,
            credential_id = %credential.credential_id,
            user_handle = %credential.user_handle,
            stored,
            received,
            "Signature counter did not advance; possible cloned authenticator"
        );

        if let Err(e) = self
            .within(
                "flag credential",
                self.credentials.flag_credential(&credential.credential_id),
            )
            .await
        {
            tracing::error!(
                "Failed to flag credential {}: {}",
                credential.credential_id,
                e
            );
        }

        CeremonyError::CounterRegression { stored, received }
    }
}
