mod backend;
mod errors;
mod memory;
mod redis;
mod sqlite;
mod store;
mod types;

pub use backend::{ChallengeBackend, TakeOutcome};
pub use errors::ChallengeError;
pub use memory::InMemoryChallengeBackend;
pub use redis::RedisChallengeBackend;
pub use sqlite::SqliteChallengeBackend;
pub use store::ChallengeStore;
pub use types::{CeremonyKind, Challenge, ChallengeUser, NONCE_LEN, Nonce};
