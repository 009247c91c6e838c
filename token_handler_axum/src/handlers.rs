use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderValue, StatusCode, header::LOCATION};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use token_handler::{SessionError, gen_random_string};

use super::error::{IntoResponseError, session_error_response};
use super::middleware::AccessToken;
use super::state::TokenHandlerState;

/// Random bytes behind each login state value.
const LOGIN_STATE_BYTES: usize = 32;

#[derive(Debug, Deserialize)]
pub(crate) struct CallbackQuery {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
}

/// 302 to `location` carrying the given `Set-Cookie` headers.
fn found(location: &str, mut headers: HeaderMap) -> Result<Response, (StatusCode, String)> {
    let location = HeaderValue::from_str(location).map_err(|_| {
        tracing::error!(%location, "Redirect target is not a valid header value");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    })?;
    headers.insert(LOCATION, location);
    Ok((StatusCode::FOUND, headers).into_response())
}

pub(crate) async fn login(
    State(state): State<TokenHandlerState>,
) -> Result<Response, (StatusCode, String)> {
    let login_state = gen_random_string(LOGIN_STATE_BYTES)
        .map_err(SessionError::from)
        .into_response_error()?;

    let mut session = state.manager.new_session();
    let headers = session.save_state(&login_state).into_response_error()?;
    let auth_url = state
        .manager
        .oidc()
        .authorization_url(&login_state)
        .await
        .into_response_error()?;

    tracing::debug!("Redirecting to the identity provider");
    found(&auth_url, headers)
}

pub(crate) async fn callback(
    State(state): State<TokenHandlerState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    if let Some(error) = &query.error {
        tracing::info!(%error, "Identity provider declined the login");
        return Err((StatusCode::UNAUTHORIZED, "Login was not completed".to_string()));
    }
    let (Some(returned_state), Some(code)) = (&query.state, &query.code) else {
        return Err((StatusCode::BAD_REQUEST, "Missing state or code".to_string()));
    };

    let session = state.manager.get_session(&headers).await.into_response_error()?;
    let expected_state = session.get_state();
    if expected_state.is_empty()
        || !bool::from(expected_state.as_bytes().ct_eq(returned_state.as_bytes()))
    {
        tracing::warn!("Login state mismatch");
        return Err((StatusCode::UNAUTHORIZED, "Login state mismatch".to_string()));
    }

    let token = state
        .manager
        .oidc()
        .exchange_code(code)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Authorization code exchange failed");
            (StatusCode::UNAUTHORIZED, "Login failed".to_string())
        })?;

    // Fresh identifier for the authenticated session.
    let mut session = state.manager.new_session();
    let headers = session.save(&token).await.into_response_error()?;
    found(&state.post_login_redirect, headers)
}

pub(crate) async fn logout(
    State(state): State<TokenHandlerState>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let post_logout = state.post_logout_redirect.as_ref();

    let mut session = match state.manager.get_session(&headers).await {
        Ok(session) => session,
        Err(e) if e.is_unauthorized() => {
            tracing::debug!(error = %e, "Logout without a live session");
            let headers = state.manager.expired_cookie().into_response_error()?;
            return found(post_logout, headers);
        }
        Err(e) => return Err(session_error_response(&e)),
    };

    let Some(id_token) = session.data().map(|data| data.id_token.clone()) else {
        let headers = state.manager.expired_cookie().into_response_error()?;
        return found(post_logout, headers);
    };
    let headers = session.delete().await.into_response_error()?;

    let target = match state
        .manager
        .oidc()
        .end_session_url(&id_token, post_logout)
        .await
    {
        Ok(Some(url)) => url,
        Ok(None) => post_logout.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot build the end-session URL");
            post_logout.to_string()
        }
    };
    found(&target, headers)
}

pub(crate) async fn userinfo(
    State(state): State<TokenHandlerState>,
    access_token: AccessToken,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let info = state
        .manager
        .oidc()
        .fetch_userinfo(access_token.as_str())
        .await
        .into_response_error()?;
    Ok(Json(info))
}
