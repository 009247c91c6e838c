//! Axum integration for the `token_handler` session layer.
//!
//! [`auth_router`] serves the login, callback, logout and userinfo endpoints;
//! mount it under [`AUTH_ROUTE_PREFIX`]. [`require_session`] protects any
//! other route and hands the live access token to handlers as
//! [`AccessToken`]. [`proxy_router`] forwards API prefixes to upstream
//! services with that token as a bearer token.

mod config;
mod error;
mod handlers;
mod middleware;
mod proxy;
mod router;
mod state;

pub use config::AUTH_ROUTE_PREFIX;
pub use middleware::{AccessToken, require_session};
pub use proxy::{MAX_PROXY_BODY_BYTES, proxy_router};
pub use router::{auth_router, auth_router_no_trace};
pub use state::TokenHandlerState;
