//! Router for the token-handler endpoints

use axum::{Router, middleware::from_fn_with_state, routing::get};
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers::{callback, login, logout, userinfo};
use super::middleware::require_session;
use super::state::TokenHandlerState;

/// Create the router for the login flow endpoints
///
/// Mount it under [`crate::AUTH_ROUTE_PREFIX`]. The endpoints are:
/// - `GET /login`: starts the code flow
/// - `GET /callback`: completes it and creates the session
/// - `GET /logout`: deletes the session and signs out at the provider
/// - `GET /userinfo`: the provider's userinfo for the session
///
/// Request headers are left out of the trace spans since they carry the
/// session cookie.
pub fn auth_router(state: TokenHandlerState) -> Router {
    auth_router_no_trace(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(
                DefaultMakeSpan::new()
                    .level(Level::INFO)
                    .include_headers(false),
            )
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(
                DefaultOnResponse::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Millis),
            ),
    )
}

/// Same as [`auth_router`] without the HTTP tracing layer.
pub fn auth_router_no_trace(state: TokenHandlerState) -> Router {
    let protected = Router::new()
        .route("/userinfo", get(userinfo))
        .route_layer(from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/logout", get(logout))
        .merge(protected)
        .with_state(state)
}
