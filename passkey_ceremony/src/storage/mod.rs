mod config;
mod errors;
mod schema_validation;

pub use config::{CacheStoreKind, DataStoreKind, StoreSettings, open_sqlite_pool};
pub use errors::StorageError;

pub(crate) use errors::is_unique_violation;
pub(crate) use schema_validation::validate_sqlite_table_schema;
