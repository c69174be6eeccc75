use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::storage::{StorageError, validate_sqlite_table_schema};

use super::backend::{ChallengeBackend, TakeOutcome};
use super::types::{Challenge, Nonce};

/// Challenge backend backed by the `{prefix}challenges` table.
///
/// Timestamps are stored as epoch milliseconds so expiry comparisons happen
/// numerically inside SQLite.
pub struct SqliteChallengeBackend {
    pool: Pool<Sqlite>,
    table: String,
}

impl SqliteChallengeBackend {
    pub fn new(pool: Pool<Sqlite>, table_prefix: &str) -> Self {
        Self {
            pool,
            table: format!("{table_prefix}challenges"),
        }
    }
}

#[async_trait]
impl ChallengeBackend for SqliteChallengeBackend {
    async fn init(&self) -> Result<(), StorageError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                nonce TEXT PRIMARY KEY NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                retain_until INTEGER NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_retain_until ON {}(retain_until)",
            self.table, self.table
        ))
        .execute(&self.pool)
        .await?;

        let expected_columns = [
            ("nonce", "TEXT"),
            ("kind", "TEXT"),
            ("payload", "TEXT"),
            ("expires_at", "INTEGER"),
            ("retain_until", "INTEGER"),
            ("consumed", "INTEGER"),
        ];
        validate_sqlite_table_schema(
            &self.pool,
            &self.table,
            &expected_columns,
            StorageError::Storage,
        )
        .await
    }

    async fn put_if_absent(
        &self,
        challenge: &Challenge,
        retain_until: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let payload = serde_json::to_string(challenge)?;

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (nonce, kind, payload, expires_at, retain_until, consumed)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(nonce) DO NOTHING
            "#,
            self.table
        ))
        .bind(challenge.nonce.to_base64url())
        .bind(challenge.kind.to_string())
        .bind(payload)
        .bind(challenge.expires_at.timestamp_millis())
        .bind(retain_until.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn take(&self, nonce: &Nonce, now: DateTime<Utc>) -> Result<TakeOutcome, StorageError> {
        let key = nonce.to_base64url();
        let now_ms = now.timestamp_millis();

        // Single statement: only one concurrent caller can flip consumed to 1
        let payload: Option<String> = sqlx::query_scalar(&format!(
            r#"
            UPDATE {}
            SET consumed = 1
            WHERE nonce = ? AND consumed = 0 AND retain_until > ?
            RETURNING payload
            "#,
            self.table
        ))
        .bind(&key)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(payload) = payload {
            return Ok(TakeOutcome::Taken(serde_json::from_str(&payload)?));
        }

        let tombstone: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT retain_until FROM {} WHERE nonce = ? AND consumed = 1",
            self.table
        ))
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        match tombstone {
            Some(retain_until) if retain_until > now_ms => Ok(TakeOutcome::AlreadyConsumed),
            Some(_) => {
                sqlx::query(&format!("DELETE FROM {} WHERE nonce = ?", self.table))
                    .bind(&key)
                    .execute(&self.pool)
                    .await?;
                Ok(TakeOutcome::Missing)
            }
            None => Ok(TakeOutcome::Missing),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE retain_until <= ?",
            self.table
        ))
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
