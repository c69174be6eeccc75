mod errors;
mod memory;
mod repository;
mod sqlite;
mod types;

pub use errors::CredentialError;
pub use memory::InMemoryCredentialRepository;
pub use repository::CredentialRepository;
pub use sqlite::SqliteCredentialRepository;
pub use types::{
    CoseAlgorithm, CredentialId, CredentialPublicKey, MAX_CREDENTIAL_ID_LEN, StoredCredential,
    counter_advances,
};
