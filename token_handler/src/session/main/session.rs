use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::HeaderMap;

use super::manager::SessionContext;
use crate::oidc::TokenSet;
use crate::session::{
    errors::SessionError,
    types::{AuthState, CookiePayload},
};
use crate::storage::{SessionRecord, StoreError};

/// Per-request view of one browser session.
///
/// Binds the cookie payload to a cached copy of the stored record. Methods
/// that change the cookie return the `Set-Cookie` headers the caller must
/// attach to its response.
pub struct Session {
    context: Arc<SessionContext>,
    payload: Option<CookiePayload>,
    data: Option<SessionRecord>,
    terminated: bool,
}

impl Session {
    pub(super) fn new(context: Arc<SessionContext>, payload: Option<CookiePayload>) -> Self {
        Self {
            context,
            payload,
            data: None,
            terminated: false,
        }
    }

    pub fn state(&self) -> AuthState {
        match (&self.payload, self.terminated) {
            (_, true) => AuthState::Terminated,
            (None, false) => AuthState::Anonymous,
            (Some(CookiePayload::PendingLogin { .. }), false) => AuthState::PendingLogin,
            (Some(CookiePayload::Authenticated { .. }), false) => AuthState::Authenticated,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.payload {
            Some(CookiePayload::Authenticated { session_id }) => Some(session_id),
            _ => None,
        }
    }

    /// Record loaded by [`Session::data_from_store`] or written by this handle.
    pub fn data(&self) -> Option<&SessionRecord> {
        self.data.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.access_token.as_str())
    }

    /// Login state stored by [`Session::save_state`], or an empty string.
    pub fn get_state(&self) -> String {
        match &self.payload {
            Some(CookiePayload::PendingLogin { state }) => state.clone(),
            _ => String::new(),
        }
    }

    pub fn save_state(&mut self, state: &str) -> Result<HeaderMap, SessionError> {
        let payload = CookiePayload::PendingLogin {
            state: state.to_string(),
        };
        let headers = self.write_cookie(&payload)?;
        self.payload = Some(payload);
        self.data = None;
        self.terminated = false;
        Ok(headers)
    }

    #[tracing::instrument(skip_all)]
    pub async fn data_from_store(&mut self) -> Result<&SessionRecord, SessionError> {
        let session_id = self.session_id().ok_or(SessionError::SessionInvalid)?;
        let record = self
            .context
            .store
            .get(session_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => SessionError::SessionNotFound,
                other => SessionError::Retrieval(other),
            })?;
        Ok(self.data.insert(record))
    }

    /// Stores a new session for the tokens of a completed login and points
    /// the cookie at it. Any pending login state is dropped.
    #[tracing::instrument(skip_all)]
    pub async fn save(&mut self, token: &TokenSet) -> Result<HeaderMap, SessionError> {
        let record = self.new_record(token).await?;
        let session_id = self.context.store.add(&record).await?;
        tracing::info!(%session_id, subject = %record.subject, "Session created");

        let payload = CookiePayload::Authenticated { session_id };
        let headers = self.write_cookie(&payload)?;
        self.payload = Some(payload);
        self.data = Some(record);
        Ok(headers)
    }

    /// Replaces the stored tokens after a refresh. The subject of the new
    /// identity token must match the stored one.
    #[tracing::instrument(skip_all)]
    pub async fn update(&mut self, token: &TokenSet) -> Result<HeaderMap, SessionError> {
        let session_id = self
            .session_id()
            .ok_or(SessionError::SessionInvalid)?
            .to_string();
        let record = self.new_record(token).await?;
        self.context.store.update(&session_id, &record).await?;
        tracing::debug!(%session_id, "Session tokens updated");

        let headers = self.write_cookie(&CookiePayload::Authenticated { session_id })?;
        self.data = Some(record);
        Ok(headers)
    }

    /// Trades the stored refresh token for new tokens and updates the session.
    pub async fn refresh(&mut self) -> Result<HeaderMap, SessionError> {
        if self.data.is_none() {
            self.data_from_store().await?;
        }
        let refresh_token = self
            .data
            .as_ref()
            .map(|data| data.refresh_token.clone())
            .ok_or(SessionError::SessionInvalid)?;
        let token = self
            .context
            .oidc
            .refresh_access_token(&refresh_token)
            .await
            .map_err(SessionError::Refresh)?;
        self.update(&token).await
    }

    #[tracing::instrument(skip_all)]
    pub async fn delete(&mut self) -> Result<HeaderMap, SessionError> {
        let session_id = self.session_id().ok_or(SessionError::SessionInvalid)?;
        self.context.store.delete(session_id).await?;
        tracing::info!(%session_id, "Session deleted");

        let headers = self
            .context
            .codec
            .set_cookie_header("", -1)
            .map_err(SessionError::CookieWrite)?;
        self.payload = None;
        self.data = None;
        self.terminated = true;
        Ok(headers)
    }

    async fn new_record(&self, token: &TokenSet) -> Result<SessionRecord, SessionError> {
        let identity = self
            .context
            .oidc
            .verify_identity_token(&token.id_token)
            .await
            .map_err(SessionError::Identity)?;

        Ok(SessionRecord {
            subject: identity.subject,
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            id_token: identity.raw_token,
            expires_at: DateTime::from_timestamp(token.expires_at.timestamp(), 0)
                .unwrap_or(token.expires_at),
        })
    }

    fn write_cookie(&self, payload: &CookiePayload) -> Result<HeaderMap, SessionError> {
        let codec = &self.context.codec;
        let value = codec
            .encode(payload, Utc::now())
            .map_err(SessionError::CookieWrite)?;
        codec
            .set_cookie_header(&value, codec.ttl_secs(payload))
            .map_err(SessionError::CookieWrite)
    }
}
