//! Test doubles shared by this crate's tests and, with the `test-utils`
//! feature, by dependent crates.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::oidc::{OidcError, OidcProvider, TokenSet, VerifiedIdentity};
use crate::session::{KeyPair, SessionConfig};
use crate::storage::{SessionStore, SqliteSessionStore};

/// Fresh in-memory SQLite store without encryption.
pub async fn memory_store() -> Arc<dyn SessionStore> {
    Arc::new(
        SqliteSessionStore::connect("sqlite::memory:", None)
            .await
            .expect("in-memory sqlite store"),
    )
}

/// Session settings with fixed test keys and default timeouts.
pub fn test_config() -> SessionConfig {
    let mut config = SessionConfig::new(KeyPair::new(
        b"test-authentication-key-32-bytes".to_vec(),
        b"test-encryption-key-32-bytes-000".to_vec(),
    ));
    config.cookie_domain = String::new();
    config
}

/// Identity provider double with readable tokens.
///
/// ID tokens are `id-token:<subject>`, refresh tokens `refresh:<subject>`,
/// access tokens `access:<subject>:<n>` where `n` counts refreshes.
/// Authorization codes are `code:<subject>`.
pub struct MockOidcProvider {
    fail_refresh: AtomicBool,
    refresh_calls: AtomicUsize,
    refresh_subject: Mutex<Option<String>>,
    end_session_endpoint: Option<String>,
}

impl Default for MockOidcProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOidcProvider {
    pub fn new() -> Self {
        Self {
            fail_refresh: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            refresh_subject: Mutex::new(None),
            end_session_endpoint: Some("https://idp.example.com/logout".to_string()),
        }
    }

    pub fn without_end_session() -> Self {
        Self {
            end_session_endpoint: None,
            ..Self::new()
        }
    }

    pub fn token_set(subject: &str, expires_in_secs: i64) -> TokenSet {
        Self::token_set_numbered(subject, expires_in_secs, 0)
    }

    fn token_set_numbered(subject: &str, expires_in_secs: i64, n: usize) -> TokenSet {
        let expires_at = DateTime::from_timestamp(Utc::now().timestamp(), 0)
            .unwrap_or_else(Utc::now)
            + Duration::seconds(expires_in_secs);
        TokenSet {
            access_token: format!("access:{subject}:{n}"),
            refresh_token: format!("refresh:{subject}"),
            id_token: format!("id-token:{subject}"),
            expires_at,
        }
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Makes refreshes return tokens of another subject.
    pub fn refresh_as(&self, subject: &str) {
        if let Ok(mut slot) = self.refresh_subject.lock() {
            *slot = Some(subject.to_string());
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OidcProvider for MockOidcProvider {
    async fn verify_identity_token(&self, raw_token: &str) -> Result<VerifiedIdentity, OidcError> {
        match raw_token.strip_prefix("id-token:") {
            Some(subject) if !subject.is_empty() => Ok(VerifiedIdentity {
                subject: subject.to_string(),
                raw_token: raw_token.to_string(),
            }),
            _ => Err(OidcError::IdToken("unknown test token".to_string())),
        }
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, OidcError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(OidcError::Refresh("invalid_grant".to_string()));
        }
        let owner = refresh_token
            .strip_prefix("refresh:")
            .ok_or_else(|| OidcError::Refresh("unknown refresh token".to_string()))?;
        let subject = self
            .refresh_subject
            .lock()
            .ok()
            .and_then(|s| s.clone())
            .unwrap_or_else(|| owner.to_string());
        Ok(Self::token_set_numbered(&subject, 3600, n))
    }

    async fn authorization_url(&self, state: &str) -> Result<String, OidcError> {
        let url = url::Url::parse_with_params(
            "https://idp.example.com/authorize",
            &[("client_id", "test-client"), ("state", state)],
        )?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OidcError> {
        match code.strip_prefix("code:") {
            Some(subject) if !subject.is_empty() => Ok(Self::token_set(subject, 3600)),
            _ => Err(OidcError::TokenExchange("invalid_grant".to_string())),
        }
    }

    async fn end_session_url(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: &str,
    ) -> Result<Option<String>, OidcError> {
        let Some(endpoint) = &self.end_session_endpoint else {
            return Ok(None);
        };
        let url = url::Url::parse_with_params(
            endpoint,
            &[
                ("id_token_hint", id_token_hint),
                ("post_logout_redirect_uri", post_logout_redirect_uri),
            ],
        )?;
        Ok(Some(url.into()))
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<serde_json::Value, OidcError> {
        let subject = access_token
            .strip_prefix("access:")
            .and_then(|rest| rest.split(':').next())
            .ok_or_else(|| OidcError::UserInfo("401 Unauthorized".to_string()))?;
        Ok(serde_json::json!({ "sub": subject, "email": format!("{subject}@example.com") }))
    }
}
