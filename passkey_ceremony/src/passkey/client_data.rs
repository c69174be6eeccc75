use crate::AUDIT_TARGET;
use crate::challenge::{CeremonyKind, Nonce};
use crate::config::CeremonyConfig;
use crate::utils::{base64url_decode, sha256};

use super::errors::{CeremonyError, VerificationStep};

/// `clientDataJSON` as collected by the browser.
#[derive(Debug, Clone)]
pub(crate) struct ParsedClientData {
    pub(crate) challenge: Vec<u8>,
    pub(crate) origin: String,
    pub(crate) type_: String,
    pub(crate) raw_data: Vec<u8>,
}

impl ParsedClientData {
    pub(crate) fn from_base64(client_data_json: &str) -> Result<Self, CeremonyError> {
        let raw_data = base64url_decode(client_data_json).map_err(|e| {
            CeremonyError::MalformedRequest(format!("clientDataJSON: {e}"))
        })?;

        let data: serde_json::Value = serde_json::from_slice(&raw_data)
            .map_err(|e| CeremonyError::MalformedRequest(format!("clientDataJSON: {e}")))?;

        let field = |name: &str| {
            data[name]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    CeremonyError::MalformedRequest(format!("clientDataJSON: missing {name}"))
                })
        };

        let challenge = base64url_decode(&field("challenge")?).map_err(|e| {
            CeremonyError::MalformedRequest(format!("clientDataJSON challenge: {e}"))
        })?;

        Ok(Self {
            challenge,
            origin: field("origin")?,
            type_: field("type")?,
            raw_data,
        })
    }

    /// The nonce the client claims to answer.
    pub(crate) fn nonce(&self) -> Nonce {
        Nonce::from_bytes(self.challenge.clone())
    }

    pub(crate) fn hash(&self) -> [u8; 32] {
        sha256(&self.raw_data)
    }

    /// Checks ceremony type, challenge binding and origin, in that order.
    pub(crate) fn verify(
        &self,
        kind: CeremonyKind,
        nonce: &Nonce,
        config: &CeremonyConfig,
    ) -> Result<(), CeremonyError> {
        if self.type_ != kind.client_data_type() {
            return Err(CeremonyError::failed(
                VerificationStep::ClientData,
                format!(
                    "invalid type. Expected '{}', Got: '{}'",
                    kind.client_data_type(),
                    self.type_
                ),
            ));
        }

        if !nonce.matches(&self.challenge) {
            return Err(CeremonyError::failed(
                VerificationStep::ClientData,
                "challenge mismatch",
            ));
        }

        if !config.is_allowed_origin(&self.origin) {
            tracing::warn!(
                target: AUDIT_TARGET,
                origin = %self.origin,
                ceremony = %kind,
                "Rejected client data from origin outside the allow-list"
            );
            return Err(CeremonyError::OriginMismatch(self.origin.clone()));
        }

        tracing::debug!("Client data verified: type={}, origin={}", self.type_, self.origin);
        Ok(())
    }
}
