use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Sqlite};

use crate::storage::{is_unique_violation, validate_sqlite_table_schema};

use super::errors::UserError;
use super::store::IdentityStore;
use super::types::{UserHandle, UserIdentity};

/// Identity store backed by the `{prefix}users` table.
pub struct SqliteIdentityStore {
    pool: Pool<Sqlite>,
    table: String,
}

#[derive(FromRow)]
struct UserRow {
    user_handle: String,
    name: String,
    display_name: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserIdentity {
    type Error = UserError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserIdentity {
            user_handle: UserHandle::from_base64url(&row.user_handle)?,
            name: row.name,
            display_name: row.display_name,
            created_at: row.created_at,
        })
    }
}

impl SqliteIdentityStore {
    pub fn new(pool: Pool<Sqlite>, table_prefix: &str) -> Self {
        Self {
            pool,
            table: format!("{table_prefix}users"),
        }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<UserIdentity>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"SELECT user_handle, name, display_name, created_at FROM {} WHERE {} = ?"#,
            self.table, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserIdentity::try_from).transpose()
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn init(&self) -> Result<(), UserError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                user_handle TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;

        let expected_columns = [
            ("user_handle", "TEXT"),
            ("name", "TEXT"),
            ("display_name", "TEXT"),
            ("created_at", "TIMESTAMP"),
        ];
        validate_sqlite_table_schema(&self.pool, &self.table, &expected_columns, UserError::Storage)
            .await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<UserIdentity>, UserError> {
        self.find_one("name", name).await
    }

    async fn find_by_handle(&self, handle: &UserHandle) -> Result<Option<UserIdentity>, UserError> {
        self.find_one("user_handle", &handle.to_base64url()).await
    }

    async fn insert(&self, identity: &UserIdentity) -> Result<(), UserError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (user_handle, name, display_name, created_at)
            VALUES (?, ?, ?, ?)
            "#,
            self.table
        ))
        .bind(identity.user_handle.to_base64url())
        .bind(&identity.name)
        .bind(&identity.display_name)
        .bind(identity.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                UserError::Conflict(format!("name '{}'", identity.name))
            } else {
                UserError::Storage(e.to_string())
            }
        })?;

        Ok(())
    }
}
