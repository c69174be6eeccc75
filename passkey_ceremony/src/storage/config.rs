//! Store selection and connection setup

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::errors::StorageError;

const DEFAULT_TABLE_PREFIX: &str = "pkc_";

/// Backend for durable identity and credential records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataStoreKind {
    Memory,
    Sqlite(String),
}

/// Backend for short-lived challenges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStoreKind {
    Memory,
    Sqlite(String),
    Redis(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub data_store: DataStoreKind,
    pub cache_store: CacheStoreKind,
    pub table_prefix: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            data_store: DataStoreKind::Memory,
            cache_store: CacheStoreKind::Memory,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }
}

impl StoreSettings {
    pub fn from_env() -> Result<Self, StorageError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url_for = |key: &str| {
            lookup(key).ok_or_else(|| StorageError::Config(format!("{key} must be set")))
        };

        let data_store = match lookup("GENERIC_DATA_STORE_TYPE").as_deref() {
            None | Some("memory") => DataStoreKind::Memory,
            Some("sqlite") => DataStoreKind::Sqlite(url_for("GENERIC_DATA_STORE_URL")?),
            Some(t) => {
                return Err(StorageError::Config(format!(
                    "Unsupported data store type: {t}. Expected memory or sqlite"
                )));
            }
        };

        let cache_store = match lookup("GENERIC_CACHE_STORE_TYPE").as_deref() {
            None | Some("memory") => CacheStoreKind::Memory,
            Some("sqlite") => CacheStoreKind::Sqlite(url_for("GENERIC_CACHE_STORE_URL")?),
            Some("redis") => CacheStoreKind::Redis(url_for("GENERIC_CACHE_STORE_URL")?),
            Some(t) => {
                return Err(StorageError::Config(format!(
                    "Unsupported cache store type: {t}. Expected memory, sqlite or redis"
                )));
            }
        };

        let table_prefix =
            lookup("DB_TABLE_PREFIX").unwrap_or_else(|| DEFAULT_TABLE_PREFIX.to_string());
        if !table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StorageError::Config(format!(
                "DB_TABLE_PREFIX '{table_prefix}' may only contain ASCII letters, digits and '_'"
            )));
        }

        // URLs may carry credentials, so only the store types are logged
        tracing::info!(
            "Store settings: data={}, cache={}, prefix={}",
            lookup("GENERIC_DATA_STORE_TYPE").as_deref().unwrap_or("memory"),
            lookup("GENERIC_CACHE_STORE_TYPE").as_deref().unwrap_or("memory"),
            table_prefix
        );

        Ok(Self {
            data_store,
            cache_store,
            table_prefix,
        })
    }
}

/// Opens a lazily connected SQLite pool, creating the database file if missing.
///
/// In-memory databases are private to one connection, so they get a single
/// connection that is never recycled.
pub fn open_sqlite_pool(url: &str) -> Result<SqlitePool, StorageError> {
    let opts = SqliteConnectOptions::from_str(url)
        .map_err(|e| StorageError::Config(format!("Failed to parse SQLite URL '{url}': {e}")))?
        .create_if_missing(true);

    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_lazy_with(opts)
    } else {
        SqlitePoolOptions::new().connect_lazy_with(opts)
    };

    tracing::info!("Opened SQLite pool: url={}", url);
    Ok(pool)
}
