use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::StoreError;

/// Server-side credentials of one authenticated session.
///
/// `expires_at` is the access-token expiry and is persisted with second
/// precision.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub subject: String,
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether the access token has expired. Drives refresh, not logout.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        let required = [
            ("subject", &self.subject),
            ("access_token", &self.access_token),
            ("refresh_token", &self.refresh_token),
            ("id_token", &self.id_token),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(StoreError::ConstraintViolation(format!(
                    "{field} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

// Tokens never reach log output.
impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("subject", &self.subject)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("id_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Row layout shared by both engines.
#[derive(sqlx::FromRow)]
pub(super) struct SessionRow {
    pub(super) subject: String,
    pub(super) access_token: String,
    pub(super) refresh_token: String,
    pub(super) id_token: String,
    pub(super) expires_at: i64,
}

impl SessionRow {
    pub(super) fn into_record(self) -> Result<SessionRecord, StoreError> {
        let expires_at = DateTime::from_timestamp(self.expires_at, 0).ok_or_else(|| {
            StoreError::Storage(format!("invalid expires_at value: {}", self.expires_at))
        })?;
        Ok(SessionRecord {
            subject: self.subject,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            expires_at,
        })
    }
}

/// Storage contract implemented by every engine.
///
/// Token fields are encrypted at rest when the engine was built with a
/// cipher. All engines report the same [`StoreError`] kinds.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new record under a freshly generated identifier.
    async fn add(&self, record: &SessionRecord) -> Result<String, StoreError>;

    async fn get(&self, session_id: &str) -> Result<SessionRecord, StoreError>;

    /// Replaces the record, refusing when the stored subject differs.
    async fn update(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError>;

    /// Idempotent.
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Deletes every record with `expires_at < cutoff` and returns how many went.
    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn close(&self);
}
