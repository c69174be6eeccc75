mod attestation;
mod auth;
mod auth_data;
mod client_data;
mod cose;
mod errors;
mod register;
mod types;

pub use errors::{CeremonyError, VerificationStep};

pub use types::{
    AuthenticationOptions, AuthenticatorAssertionResponse, AuthenticatorAttestationResponse,
    AuthenticatorResponse, AuthenticatorSelection, CredentialDescriptor, PubKeyCredParam,
    PublicKeyCredentialUserEntity, RegisterCredential, RegistrationOptions, RelyingParty,
};

pub(crate) use auth::verify_assertion;
#[cfg(test)]
pub(crate) use auth_data::flags;
pub(crate) use client_data::ParsedClientData;
pub(crate) use register::verify_registration;
pub(crate) use types::PUBLIC_KEY_TYPE;
