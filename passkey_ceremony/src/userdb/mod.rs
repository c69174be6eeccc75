mod errors;
mod memory;
mod sqlite;
mod store;
mod types;

pub use errors::UserError;
pub use memory::InMemoryIdentityStore;
pub use sqlite::SqliteIdentityStore;
pub use store::IdentityStore;
pub use types::{MAX_USER_HANDLE_LEN, USER_HANDLE_LEN, UserHandle, UserIdentity};
