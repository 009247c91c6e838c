use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};

use super::{
    config::DB_TABLE_SESSIONS,
    encryption::TokenSealer,
    errors::StoreError,
    types::{SessionRecord, SessionRow, SessionStore},
    validate_postgres_table_schema,
};
use crate::cipher::HexCipher;

/// Client-server engine.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: Pool<Postgres>,
    sealer: TokenSealer,
}

impl PostgresSessionStore {
    pub async fn connect(url: &str, cipher: Option<Arc<dyn HexCipher>>) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().connect(url).await?;
        Self::with_pool(pool, cipher).await
    }

    pub async fn with_pool(
        pool: Pool<Postgres>,
        cipher: Option<Arc<dyn HexCipher>>,
    ) -> Result<Self, StoreError> {
        create_tables_postgres(&pool).await?;
        validate_session_tables_postgres(&pool).await?;
        Ok(Self {
            pool,
            sealer: TokenSealer::new(cipher),
        })
    }
}

pub(super) async fn create_tables_postgres(pool: &Pool<Postgres>) -> Result<(), StoreError> {
    let table = DB_TABLE_SESSIONS.as_str();
    let prefix = table.replace('.', "_");

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            session_id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            id_token TEXT NOT NULL,
            expires_at BIGINT NOT NULL,
            CONSTRAINT {prefix}_session_id_not_empty CHECK (session_id <> ''),
            CONSTRAINT {prefix}_subject_not_empty CHECK (subject <> ''),
            CONSTRAINT {prefix}_access_token_not_empty CHECK (access_token <> ''),
            CONSTRAINT {prefix}_refresh_token_not_empty CHECK (refresh_token <> ''),
            CONSTRAINT {prefix}_id_token_not_empty CHECK (id_token <> '')
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{prefix}_subject ON {table}(subject)"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{prefix}_expires_at ON {table}(expires_at)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

pub(super) async fn validate_session_tables_postgres(
    pool: &Pool<Postgres>,
) -> Result<(), StoreError> {
    let expected_columns = [
        ("session_id", "text"),
        ("subject", "text"),
        ("access_token", "text"),
        ("refresh_token", "text"),
        ("id_token", "text"),
        ("expires_at", "bigint"),
    ];

    validate_postgres_table_schema(
        pool,
        DB_TABLE_SESSIONS.as_str(),
        &expected_columns,
        StoreError::Schema,
    )
    .await
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
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
            VALUES ($1, $2, $3, $4, $5, $6)
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
            FROM {table} WHERE session_id = $1
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

        let result = sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET access_token = $1, refresh_token = $2, id_token = $3, expires_at = $4
            WHERE session_id = $5 AND subject = $6
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
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE session_id = $1)"
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
        sqlx::query(&format!("DELETE FROM {table} WHERE session_id = $1"))
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let table = DB_TABLE_SESSIONS.as_str();
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE expires_at < $1"))
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
