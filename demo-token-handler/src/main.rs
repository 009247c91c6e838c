use std::sync::Arc;

use axum::{Router, middleware::from_fn_with_state, routing::get};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use token_handler::{OidcClient, SessionManager, SharedSessionStore, TokenHandlerConfig};
use token_handler_axum::{
    AUTH_ROUTE_PREFIX, TokenHandlerState, auth_router, proxy_router, require_session,
};

mod handlers;
mod server;

use crate::{
    handlers::{index, protected},
    server::{serve, shutdown_signal},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "{}=debug,token_handler=debug,token_handler_axum=debug",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TokenHandlerConfig::from_env()?;
    tracing::debug!(?config, "Configuration loaded");

    let cipher = config.store_cipher()?;
    let shared_store = SharedSessionStore::new();
    let store = shared_store.get_or_connect(&config.store, cipher).await?;

    let oidc = Arc::new(OidcClient::new(config.oidc.clone())?);
    let shutdown = CancellationToken::new();
    let manager = SessionManager::new(
        config.session.clone(),
        store.clone(),
        oidc,
        shutdown.clone(),
    )?;

    let state = TokenHandlerState::new(
        manager.clone(),
        config.post_login_redirect_url.as_str(),
        config.post_logout_redirect_url.as_str(),
    );

    let proxy_client = reqwest::Client::builder()
        .timeout(config.proxy_timeout)
        .build()?;

    let app = Router::new()
        .route("/protected", get(protected))
        .route_layer(from_fn_with_state(state.clone(), require_session))
        .merge(proxy_router(state.clone(), &config.proxy_routes, proxy_client))
        .route("/", get(index))
        .nest(AUTH_ROUTE_PREFIX.as_str(), auth_router(state));

    serve(&config.listen_addr, app, shutdown_signal()).await?;

    // Requests have drained; stop the sweep before the pool goes away.
    shutdown.cancel();
    manager.wait_sweeper().await;
    store.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
