use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use super::{
    config::DB_TABLE_SESSIONS,
    encryption::TokenSealer,
    errors::StoreError,
    types::{SessionRecord, SessionRow, SessionStore},
    validate_sqlite_table_schema,
};
use crate::cipher::HexCipher;

/// Embedded file-backed engine.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: Pool<Sqlite>,
    sealer: TokenSealer,
}

impl SqliteSessionStore {
    /// Opens (creating if needed) the database at `url`, e.g.
    /// `sqlite:./sessions.db` or `sqlite::memory:`.
    pub async fn connect(url: &str, cipher: Option<Arc<dyn HexCipher>>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to an in-memory database is a separate database.
        let pool_options = if url.contains(":memory:") || url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = pool_options.connect_with(options).await?;
        Self::with_pool(pool, cipher).await
    }

    pub async fn with_pool(
        pool: Pool<Sqlite>,
        cipher: Option<Arc<dyn HexCipher>>,
    ) -> Result<Self, StoreError> {
        create_tables_sqlite(&pool).await?;
        validate_session_tables_sqlite(&pool).await?;
        Ok(Self {
            pool,
            sealer: TokenSealer::new(cipher),
        })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

pub(super) async fn create_tables_sqlite(pool: &Pool<Sqlite>) -> Result<(), StoreError> {
    let table = DB_TABLE_SESSIONS.as_str();

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            session_id TEXT PRIMARY KEY NOT NULL CHECK (session_id != ''),
            subject TEXT NOT NULL CHECK (subject != ''),
            access_token TEXT NOT NULL CHECK (access_token != ''),
            refresh_token TEXT NOT NULL CHECK (refresh_token != ''),
            id_token TEXT NOT NULL CHECK (id_token != ''),
            expires_at INTEGER NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    let index_prefix = table.replace('.', "_");
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{index_prefix}_subject ON {table}(subject)"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{index_prefix}_expires_at ON {table}(expires_at)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

pub(super) async fn validate_session_tables_sqlite(pool: &Pool<Sqlite>) -> Result<(), StoreError> {
    let expected_columns = [
        ("session_id", "TEXT"),
        ("subject", "TEXT"),
        ("access_token", "TEXT"),
        ("refresh_token", "TEXT"),
        ("id_token", "TEXT"),
        ("expires_at", "INTEGER"),
    ];

    validate_sqlite_table_schema(
        pool,
        DB_TABLE_SESSIONS.as_str(),
        &expected_columns,
        StoreError::Schema,
    )
    .await
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    #[tracing::instrument(skip_all, fields(subject = %record.subject))]
    async fn add(&self, record: &SessionRecord) -> Result<String, StoreError> {
        record.validate()?;
        let sealed = self.sealer.seal(record)?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let table = DB_TABLE_SESSIONS.as_str();

        sqlx::query(&format!(
            r#"
            INSERT INTO {table}
                (session_id, subject, access_token, refresh_token, id_token, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#
        ))
        .bind(&session_id)
        .bind(&sealed.subject)
        .bind(&sealed.access_token)
        .bind(&sealed.refresh_token)
        .bind(&sealed.id_token)
        .bind(sealed.expires_at.timestamp())
        .execute(&self.pool)
        .await?;

        tracing::debug!(%session_id, "Stored new session");
        Ok(session_id)
    }

    #[tracing::instrument(skip_all)]
    async fn get(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        let table = DB_TABLE_SESSIONS.as_str();
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT subject, access_token, refresh_token, id_token, expires_at
            FROM {table} WHERE session_id = ?
            "#
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        self.sealer.open(row.into_record()?)
    }

    #[tracing::instrument(skip_all, fields(subject = %record.subject))]
    async fn update(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        record.validate()?;
        let sealed = self.sealer.seal(record)?;
        let table = DB_TABLE_SESSIONS.as_str();

        // Subject check and write happen in one statement.
        let result = sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET access_token = ?, refresh_token = ?, id_token = ?, expires_at = ?
            WHERE session_id = ? AND subject = ?
            "#
        ))
        .bind(&sealed.access_token)
        .bind(&sealed.refresh_token)
        .bind(&sealed.id_token)
        .bind(sealed.expires_at.timestamp())
        .bind(session_id)
        .bind(&sealed.subject)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE session_id = ?)"
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            Err(StoreError::SubjectMismatch)
        } else {
            Err(StoreError::NotFound)
        }
    }

    #[tracing::instrument(skip_all)]
    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let table = DB_TABLE_SESSIONS.as_str();
        sqlx::query(&format!("DELETE FROM {table} WHERE session_id = ?"))
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let table = DB_TABLE_SESSIONS.as_str();
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE expires_at < ?"))
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
