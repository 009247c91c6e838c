use std::fmt;

use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, StatusCode, request::Parts};
use token_handler::{Session, SessionError};

use super::error::session_error_response;
use super::state::TokenHandlerState;

/// Live access token of the request's session.
///
/// Inserted into the request extensions by [`require_session`] and available
/// as an extractor on the routes it protects.
#[derive(Clone)]
pub struct AccessToken(pub String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

impl<S> FromRequestParts<S> for AccessToken
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AccessToken>().cloned().ok_or_else(|| {
            tracing::error!("AccessToken extracted on a route without require_session");
            (StatusCode::UNAUTHORIZED, "Unauthorized")
        })
    }
}

/// Middleware admitting only requests with an authenticated session.
///
/// An access token past its expiry is refreshed first, and the re-issued
/// session cookie is appended to the handler's response. Unauthenticated
/// requests and failed refreshes get 401; store failures get 500.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/orders", get(orders))
///     .route_layer(middleware::from_fn_with_state(state.clone(), require_session));
/// ```
pub async fn require_session(
    State(state): State<TokenHandlerState>,
    mut req: Request,
    next: Next,
) -> Response {
    let (access_token, cookie_headers) = match authorize(&state, req.headers()).await {
        Ok(authorized) => authorized,
        Err(e) => return session_error_response(&e).into_response(),
    };

    req.extensions_mut().insert(AccessToken(access_token));
    let mut response = next.run(req).await;

    // Append rather than extend: the handler may have set cookies too.
    for (name, value) in cookie_headers.iter() {
        response.headers_mut().append(name, value.clone());
    }
    response
}

async fn authorize(
    state: &TokenHandlerState,
    headers: &HeaderMap,
) -> Result<(String, HeaderMap), SessionError> {
    let mut session = state.manager.get_session(headers).await?;
    if session.data().is_none() {
        session.data_from_store().await?;
    }

    let cookie_headers = refresh_if_expired(&mut session).await?;
    let access_token = session
        .access_token()
        .ok_or(SessionError::SessionInvalid)?
        .to_string();
    Ok((access_token, cookie_headers))
}

async fn refresh_if_expired(session: &mut Session) -> Result<HeaderMap, SessionError> {
    if !session.data().is_some_and(|data| data.is_expired()) {
        return Ok(HeaderMap::new());
    }
    tracing::debug!(session_id = ?session.session_id(), "Access token expired, refreshing");
    session.refresh().await
}
