use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Sqlite};
use uuid::Uuid;

use crate::storage::{is_unique_violation, validate_sqlite_table_schema};
use crate::userdb::UserHandle;
use crate::utils::{base64url_decode, base64url_encode};

use super::errors::CredentialError;
use super::repository::CredentialRepository;
use super::types::{CoseAlgorithm, CredentialId, CredentialPublicKey, StoredCredential};

/// Credential repository backed by the `{prefix}credentials` table.
pub struct SqliteCredentialRepository {
    pool: Pool<Sqlite>,
    table: String,
}

#[derive(FromRow)]
struct CredentialRow {
    credential_id: String,
    user_handle: String,
    algorithm: i64,
    public_key: String,
    counter: i64,
    aaguid: String,
    attestation_format: String,
    transports: String,
    backup_eligible: bool,
    backup_state: bool,
    flagged: bool,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl TryFrom<CredentialRow> for StoredCredential {
    type Error = CredentialError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let invalid = |e: String| CredentialError::InvalidData(e);

        Ok(StoredCredential {
            credential_id: CredentialId::from_base64url(&row.credential_id)
                .map_err(|e| invalid(e.to_string()))?,
            user_handle: UserHandle::from_base64url(&row.user_handle)
                .map_err(|e| invalid(e.to_string()))?,
            public_key: CredentialPublicKey {
                algorithm: CoseAlgorithm::try_from(row.algorithm).map_err(invalid)?,
                cose_key: base64url_decode(&row.public_key).map_err(|e| invalid(e.to_string()))?,
            },
            counter: u32::try_from(row.counter).map_err(|e| invalid(e.to_string()))?,
            aaguid: Uuid::parse_str(&row.aaguid).map_err(|e| invalid(e.to_string()))?,
            attestation_format: row.attestation_format,
            transports: serde_json::from_str(&row.transports)?,
            backup_eligible: row.backup_eligible,
            backup_state: row.backup_state,
            flagged: row.flagged,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        })
    }
}

impl SqliteCredentialRepository {
    pub fn new(pool: Pool<Sqlite>, table_prefix: &str) -> Self {
        Self {
            pool,
            table: format!("{table_prefix}credentials"),
        }
    }
}

#[async_trait]
impl CredentialRepository for SqliteCredentialRepository {
    async fn init(&self) -> Result<(), CredentialError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                credential_id TEXT PRIMARY KEY NOT NULL,
                user_handle TEXT NOT NULL,
                algorithm INTEGER NOT NULL,
                public_key TEXT NOT NULL,
                counter INTEGER NOT NULL DEFAULT 0,
                aaguid TEXT NOT NULL,
                attestation_format TEXT NOT NULL,
                transports TEXT NOT NULL,
                backup_eligible BOOLEAN NOT NULL,
                backup_state BOOLEAN NOT NULL,
                flagged BOOLEAN NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                last_used_at TIMESTAMP
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_user_handle ON {}(user_handle)",
            self.table, self.table
        ))
        .execute(&self.pool)
        .await?;

        let expected_columns = [
            ("credential_id", "TEXT"),
            ("user_handle", "TEXT"),
            ("algorithm", "INTEGER"),
            ("public_key", "TEXT"),
            ("counter", "INTEGER"),
            ("aaguid", "TEXT"),
            ("attestation_format", "TEXT"),
            ("transports", "TEXT"),
            ("backup_eligible", "BOOLEAN"),
            ("backup_state", "BOOLEAN"),
            ("flagged", "BOOLEAN"),
            ("created_at", "TIMESTAMP"),
            ("last_used_at", "TIMESTAMP"),
        ];
        validate_sqlite_table_schema(
            &self.pool,
            &self.table,
            &expected_columns,
            CredentialError::Storage,
        )
        .await
    }

    async fn find_by_user_handle(
        &self,
        user_handle: &UserHandle,
    ) -> Result<Vec<StoredCredential>, CredentialError> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"SELECT * FROM {} WHERE user_handle = ? ORDER BY created_at"#,
            self.table
        ))
        .bind(user_handle.to_base64url())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredCredential::try_from).collect()
    }

    async fn find_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> Result<Option<StoredCredential>, CredentialError> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"SELECT * FROM {} WHERE credential_id = ?"#,
            self.table
        ))
        .bind(credential_id.to_base64url())
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredCredential::try_from).transpose()
    }

    async fn insert(&self, credential: &StoredCredential) -> Result<(), CredentialError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {}
            (credential_id, user_handle, algorithm, public_key, counter, aaguid,
             attestation_format, transports, backup_eligible, backup_state, flagged,
             created_at, last_used_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            self.table
        ))
        .bind(credential.credential_id.to_base64url())
        .bind(credential.user_handle.to_base64url())
        .bind(credential.public_key.algorithm.cose_id())
        .bind(base64url_encode(&credential.public_key.cose_key))
        .bind(i64::from(credential.counter))
        .bind(credential.aaguid.to_string())
        .bind(&credential.attestation_format)
        .bind(serde_json::to_string(&credential.transports)?)
        .bind(credential.backup_eligible)
        .bind(credential.backup_state)
        .bind(credential.flagged)
        .bind(credential.created_at)
        .bind(credential.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CredentialError::Duplicate(credential.credential_id.to_string())
            } else {
                CredentialError::Storage(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn increment_counter(
        &self,
        credential_id: &CredentialId,
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        let key = credential_id.to_base64url();
        let received = i64::from(new_counter);

        // Compare-and-swap: the WHERE clause is the counter rule
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET counter = ?, last_used_at = ?
            WHERE credential_id = ? AND (counter = 0 OR counter < ?)
            "#,
            self.table
        ))
        .bind(received)
        .bind(used_at)
        .bind(&key)
        .bind(received)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let stored: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT counter FROM {} WHERE credential_id = ?",
            self.table
        ))
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        match stored {
            Some(stored) => Err(CredentialError::CounterRegression {
                stored: u32::try_from(stored)
                    .map_err(|e| CredentialError::InvalidData(e.to_string()))?,
                received: new_counter,
            }),
            None => Err(CredentialError::NotFound),
        }
    }

    async fn flag_credential(&self, credential_id: &CredentialId) -> Result<(), CredentialError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET flagged = 1 WHERE credential_id = ?",
            self.table
        ))
        .bind(credential_id.to_base64url())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CredentialError::NotFound);
        }
        Ok(())
    }

    async fn delete_credential(&self, credential_id: &CredentialId) -> Result<(), CredentialError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE credential_id = ?", self.table))
            .bind(credential_id.to_base64url())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CredentialError::NotFound);
        }
        Ok(())
    }
}
