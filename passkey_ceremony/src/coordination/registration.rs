use crate::AUDIT_TARGET;
use crate::challenge::{CeremonyKind, ChallengeUser};
use crate::config::CeremonyPolicy;
use crate::credential::StoredCredential;
use crate::passkey::{
    AuthenticatorSelection, CeremonyError, ParsedClientData, PubKeyCredParam,
    PublicKeyCredentialUserEntity, PUBLIC_KEY_TYPE, RegisterCredential, RegistrationOptions,
    RelyingParty, VerificationStep, verify_registration,
};
use crate::userdb::{UserHandle, UserIdentity};

use super::{CeremonyState, PasskeyCeremony, descriptors, log_outcome};

impl PasskeyCeremony {
    /// Issues a registration challenge for `name`.
    ///
    /// An empty `name` registers a usernameless identity named after
    /// `display_name` and the current time. Nothing is persisted besides the
    /// challenge; the identity is created when the ceremony finishes.
    pub async fn begin_registration(
        &self,
        name: &str,
        display_name: &str,
        policy: Option<CeremonyPolicy>,
    ) -> Result<RegistrationOptions, CeremonyError> {
        let (name, display_name) = (name.trim(), display_name.trim());
        if name.is_empty() && display_name.is_empty() {
            return Err(CeremonyError::MalformedRequest(
                "name or display name is required".to_string(),
            ));
        }

        let name = if name.is_empty() {
            format!(
                "{display_name} (Usernameless user created at {})",
                self.clock.now().format("%Y-%m-%d %H:%M:%S UTC")
            )
        } else {
            name.to_string()
        };
        let display_name = if display_name.is_empty() {
            name.clone()
        } else {
            display_name.to_string()
        };
        let policy = policy.unwrap_or(self.config.policy);

        let existing = self
            .within("find identity", self.identities.find_by_name(&name))
            .await?;

        let (user_handle, excluded) = match existing {
            Some(identity) => {
                let credentials = self
                    .within(
                        "list credentials",
                        self.credentials.find_by_user_handle(&identity.user_handle),
                    )
                    .await?;
                tracing::debug!(
                    "Registering another credential for {} ({} existing)",
                    name,
                    credentials.len()
                );
                (identity.user_handle, descriptors(&credentials))
            }
            None => (UserHandle::generate()?, Vec::new()),
        };

        let user = ChallengeUser {
            user_handle,
            name,
            display_name,
        };

        let challenge = self
            .within(
                "issue challenge",
                self.challenges.issue(
                    CeremonyKind::Registration,
                    Some(user.clone()),
                    policy.user_verification,
                    self.config.challenge_ttl,
                ),
            )
            .await?;

        tracing::info!(
            state = %CeremonyState::Issued,
            ceremony = %CeremonyKind::Registration,
            user_handle = %user.user_handle,
            "Registration challenge issued for {}",
            user.name
        );

        Ok(RegistrationOptions {
            challenge: challenge.nonce.to_base64url(),
            rp: RelyingParty {
                id: self.config.rp_id.clone(),
                name: self.config.rp_name.clone(),
            },
            user: PublicKeyCredentialUserEntity {
                user_handle: user.user_handle.to_base64url(),
                name: user.name,
                display_name: user.display_name,
            },
            pub_key_cred_params: self
                .config
                .algorithms
                .iter()
                .map(|alg| PubKeyCredParam {
                    type_: PUBLIC_KEY_TYPE.to_string(),
                    alg: alg.cose_id(),
                })
                .collect(),
            timeout: self.config.client_timeout.as_millis() as u64,
            exclude_credentials: excluded,
            authenticator_selection: AuthenticatorSelection {
                authenticator_attachment: policy.authenticator_attachment,
                resident_key: policy.resident_key,
                require_resident_key: policy.require_resident_key(),
                user_verification: policy.user_verification,
            },
            attestation: policy.attestation,
        })
    }

    /// Verifies a registration response and stores the new credential.
    ///
    /// The challenge is burned before verification starts, so a failed
    /// attempt cannot be retried with the same response.
    pub async fn finish_registration(
        &self,
        reg_data: &RegisterCredential,
    ) -> Result<UserIdentity, CeremonyError> {
        let result = self.try_finish_registration(reg_data).await;
        log_outcome(CeremonyKind::Registration, &result);
        result
    }

    async fn try_finish_registration(
        &self,
        reg_data: &RegisterCredential,
    ) -> Result<UserIdentity, CeremonyError> {
        let client_data = ParsedClientData::from_base64(&reg_data.response.client_data_json)?;
        let challenge = self
            .within("consume challenge", self.challenges.consume(&client_data.nonce()))
            .await?;

        let now = self.clock.now();
        let credential = verify_registration(reg_data, &challenge, &self.config, now)?;
        let user = challenge.user.as_ref().ok_or_else(|| {
            CeremonyError::failed(VerificationStep::UserHandle, "challenge has no user")
        })?;

        if let Some(existing) = self
            .within(
                "find credential",
                self.credentials.find_by_credential_id(&credential.credential_id),
            )
            .await?
        {
            tracing::warn!(
                target: AUDIT_TARGET,
                credential_id = %credential.credential_id,
                owner = %existing.user_handle,
                requested_by = %user.user_handle,
                "Rejected registration of an already registered credential"
            );
            return Err(CeremonyError::DuplicateCredential(
                credential.credential_id.to_base64url(),
            ));
        }

        // Read-only check first; nothing is written until the credential
        // insert has claimed the id.
        let named = self
            .within("find identity", self.identities.find_by_name(&user.name))
            .await?;
        if let Some(identity) = named.filter(|i| i.user_handle != credential.user_handle) {
            return Err(identity_conflict(&identity, &credential));
        }

        if let Err(e) = self
            .within("insert credential", self.credentials.insert(&credential))
            .await
        {
            if let CeremonyError::DuplicateCredential(id) = &e {
                tracing::warn!(
                    target: AUDIT_TARGET,
                    credential_id = %id,
                    "Lost a concurrent registration race for the same credential"
                );
            }
            return Err(e);
        }

        let candidate = UserIdentity::new(
            user.user_handle.clone(),
            user.name.as_str(),
            user.display_name.as_str(),
            now,
        );
        let resolved = match self
            .within(
                "resolve identity",
                self.identities.resolve_or_insert(candidate),
            )
            .await
        {
            Ok(identity) if identity.user_handle == credential.user_handle => Ok(identity),
            Ok(identity) => Err(identity_conflict(&identity, &credential)),
            Err(e) => Err(e),
        };

        let identity = match resolved {
            Ok(identity) => identity,
            Err(e) => {
                self.withdraw_credential(&credential).await;
                return Err(e);
            }
        };

        tracing::info!(
            "Stored credential {} ({}, {:?}) for {}",
            credential.credential_id,
            credential.attestation_format,
            credential.public_key.algorithm,
            identity.name
        );
        Ok(identity)
    }

    /// Removes a credential whose identity could not be bound.
    async fn withdraw_credential(&self, credential: &StoredCredential) {
        match self
            .within(
                "withdraw credential",
                self.credentials.delete_credential(&credential.credential_id),
            )
            .await
        {
            Ok(()) => tracing::debug!("Withdrew credential {}", credential.credential_id),
            Err(e) => tracing::error!(
                "Failed to withdraw credential {} after identity binding failed: {}",
                credential.credential_id,
                e
            ),
        }
    }
}

fn identity_conflict(identity: &UserIdentity, credential: &StoredCredential) -> CeremonyError {
    tracing::warn!(
        "Name {} is bound to {} but the authenticator was given {}",
        identity.name,
        identity.user_handle,
        credential.user_handle
    );
    CeremonyError::IdentityConflict(identity.name.clone())
}
