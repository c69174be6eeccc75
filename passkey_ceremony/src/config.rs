use std::fmt;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::credential::CoseAlgorithm;

const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CHALLENGE_TIMEOUT_SECS: i64 = 120;
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5000;
const RECOMMENDED_CHALLENGE_TIMEOUT: std::ops::RangeInclusive<i64> = 60..=300;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResidentKeyRequirement {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorAttachment {
    Platform,
    CrossPlatform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyance {
    None,
    Indirect,
    #[default]
    Direct,
    Enterprise,
}

/// Per-ceremony preferences advertised to the client.
///
/// The user-verification requirement is also recorded with the issued
/// challenge and enforced when the response comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CeremonyPolicy {
    pub resident_key: ResidentKeyRequirement,
    pub user_verification: UserVerificationRequirement,
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    pub attestation: AttestationConveyance,
}

impl CeremonyPolicy {
    pub fn require_resident_key(&self) -> bool {
        self.resident_key == ResidentKeyRequirement::Required
    }
}

/// Relying-party parameters shared by every ceremony.
#[derive(Debug, Clone)]
pub struct CeremonyConfig {
    pub rp_id: String,
    pub rp_name: String,
    /// Normalised origins accepted in client data; the first entry is the primary origin.
    pub allowed_origins: Vec<String>,
    /// Timeout advertised to the client in the options payload.
    pub client_timeout: StdDuration,
    pub challenge_ttl: Duration,
    pub algorithms: Vec<CoseAlgorithm>,
    pub policy: CeremonyPolicy,
    pub accept_unknown_attestation: bool,
    pub reject_flagged_credentials: bool,
    pub storage_timeout: StdDuration,
}

impl CeremonyConfig {
    /// Builds a configuration for `origin`, deriving the rpId from its host.
    pub fn new(origin: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(origin)
            .map_err(|e| ConfigError::Invalid(format!("ORIGIN '{origin}': {e}")))?;
        let rp_id = url
            .host_str()
            .ok_or_else(|| ConfigError::Invalid(format!("ORIGIN '{origin}' has no host")))?
            .to_string();

        Ok(Self {
            rp_name: origin.to_string(),
            rp_id,
            allowed_origins: vec![normalize_origin(origin)?],
            client_timeout: StdDuration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS),
            challenge_ttl: Duration::seconds(DEFAULT_CHALLENGE_TIMEOUT_SECS),
            algorithms: vec![
                CoseAlgorithm::Es256,
                CoseAlgorithm::EdDsa,
                CoseAlgorithm::Rs256,
            ],
            policy: CeremonyPolicy::default(),
            accept_unknown_attestation: false,
            reject_flagged_credentials: false,
            storage_timeout: StdDuration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
        })
    }

    pub fn with_rp_id(mut self, rp_id: impl Into<String>) -> Self {
        self.rp_id = rp_id.into();
        self
    }

    pub fn with_rp_name(mut self, rp_name: impl Into<String>) -> Self {
        self.rp_name = rp_name.into();
        self
    }

    pub fn with_allowed_origin(mut self, origin: &str) -> Result<Self, ConfigError> {
        let normalized = normalize_origin(origin)?;
        if !self.allowed_origins.contains(&normalized) {
            self.allowed_origins.push(normalized);
        }
        Ok(self)
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Result<Self, ConfigError> {
        if ttl <= Duration::zero() {
            return Err(ConfigError::Invalid(
                "challenge TTL must be positive".to_string(),
            ));
        }
        if !RECOMMENDED_CHALLENGE_TIMEOUT.contains(&ttl.num_seconds()) {
            tracing::warn!(
                "Challenge TTL of {}s is outside the recommended 60..=300s range",
                ttl.num_seconds()
            );
        }
        self.challenge_ttl = ttl;
        Ok(self)
    }

    pub fn with_policy(mut self, policy: CeremonyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_algorithms(mut self, algorithms: Vec<CoseAlgorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    pub fn with_accept_unknown_attestation(mut self, accept: bool) -> Self {
        self.accept_unknown_attestation = accept;
        self
    }

    pub fn with_reject_flagged_credentials(mut self, reject: bool) -> Self {
        self.reject_flagged_credentials = reject;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: StdDuration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let origin = lookup("ORIGIN").ok_or_else(|| ConfigError::Missing("ORIGIN".into()))?;
        let mut config = Self::new(&origin)?;

        if let Some(rp_id) = lookup("PASSKEY_RP_ID") {
            config = config.with_rp_id(rp_id);
        }
        if let Some(rp_name) = lookup("PASSKEY_RP_NAME") {
            config = config.with_rp_name(rp_name);
        }
        if let Some(extra) = lookup("PASSKEY_ALLOWED_ORIGINS") {
            for origin in extra.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                config = config.with_allowed_origin(origin)?;
            }
        }

        config.client_timeout = StdDuration::from_secs(parse_or_default(
            &lookup,
            "PASSKEY_TIMEOUT",
            DEFAULT_CLIENT_TIMEOUT_SECS,
        ));

        let ttl = parse_or_default(
            &lookup,
            "PASSKEY_CHALLENGE_TIMEOUT",
            DEFAULT_CHALLENGE_TIMEOUT_SECS,
        );
        config = config.with_challenge_ttl(Duration::seconds(ttl))?;

        config.policy = CeremonyPolicy {
            resident_key: match lookup("PASSKEY_RESIDENT_KEY") {
                None => ResidentKeyRequirement::default(),
                Some(v) => match v.to_lowercase().as_str() {
                    "required" => ResidentKeyRequirement::Required,
                    "preferred" => ResidentKeyRequirement::Preferred,
                    "discouraged" => ResidentKeyRequirement::Discouraged,
                    invalid => {
                        tracing::warn!(
                            "Invalid resident key: {}. Using default 'preferred'",
                            invalid
                        );
                        ResidentKeyRequirement::default()
                    }
                },
            },
            user_verification: match lookup("PASSKEY_USER_VERIFICATION") {
                None => UserVerificationRequirement::default(),
                Some(v) => match v.to_lowercase().as_str() {
                    "required" => UserVerificationRequirement::Required,
                    "preferred" => UserVerificationRequirement::Preferred,
                    "discouraged" => UserVerificationRequirement::Discouraged,
                    invalid => {
                        tracing::warn!(
                            "Invalid user verification: {}. Using default 'preferred'",
                            invalid
                        );
                        UserVerificationRequirement::default()
                    }
                },
            },
            authenticator_attachment: match lookup("PASSKEY_AUTHENTICATOR_ATTACHMENT") {
                None => None,
                Some(v) => match v.to_lowercase().as_str() {
                    "platform" => Some(AuthenticatorAttachment::Platform),
                    "cross-platform" => Some(AuthenticatorAttachment::CrossPlatform),
                    "none" => None,
                    invalid => {
                        tracing::warn!(
                            "Invalid authenticator attachment: {}. Using no preference",
                            invalid
                        );
                        None
                    }
                },
            },
            attestation: match lookup("PASSKEY_ATTESTATION") {
                None => AttestationConveyance::default(),
                Some(v) => match v.to_lowercase().as_str() {
                    "none" => AttestationConveyance::None,
                    "indirect" => AttestationConveyance::Indirect,
                    "direct" => AttestationConveyance::Direct,
                    "enterprise" => AttestationConveyance::Enterprise,
                    invalid => {
                        tracing::warn!("Invalid attestation: {}. Using default 'direct'", invalid);
                        AttestationConveyance::default()
                    }
                },
            },
        };

        config.accept_unknown_attestation =
            parse_or_default(&lookup, "PASSKEY_ACCEPT_UNKNOWN_ATTESTATION", false);
        config.reject_flagged_credentials =
            parse_or_default(&lookup, "PASSKEY_REJECT_FLAGGED_CREDENTIALS", false);
        config.storage_timeout = StdDuration::from_millis(parse_or_default(
            &lookup,
            "PASSKEY_STORAGE_TIMEOUT_MS",
            DEFAULT_STORAGE_TIMEOUT_MS,
        ));

        tracing::debug!("Ceremony configuration: {:?}", config);

        Ok(config)
    }

    /// True if `origin` (as reported by the client) is on the allow-list.
    pub fn is_allowed_origin(&self, origin: &str) -> bool {
        match normalize_origin(origin) {
            Ok(normalized) => self.allowed_origins.contains(&normalized),
            Err(_) => false,
        }
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            tracing::warn!("Invalid {}: {}. Using default {:?}", key, raw, default);
            default
        }),
    }
}

/// Reduces an origin to `scheme://host[:port]`, dropping default ports and paths.
pub(crate) fn normalize_origin(origin: &str) -> Result<String, ConfigError> {
    let url =
        Url::parse(origin).map_err(|e| ConfigError::Invalid(format!("origin '{origin}': {e}")))?;
    let serialized = url.origin().ascii_serialization();
    if serialized == "null" {
        return Err(ConfigError::Invalid(format!(
            "origin '{origin}' is opaque"
        )));
    }
    Ok(serialized)
}
