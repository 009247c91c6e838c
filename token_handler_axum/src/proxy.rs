//! Forwarding of API calls to upstream services.
//!
//! The browser calls the token handler with its session cookie; the upstream
//! API receives the session's access token as a bearer token instead and
//! never sees the cookie.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request, State},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::any,
};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use token_handler::ProxyRoute;
use url::Url;

use super::middleware::{AccessToken, require_session};
use super::state::TokenHandlerState;

/// Largest request body forwarded upstream.
pub const MAX_PROXY_BODY_BYTES: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
struct Upstream {
    prefix: Arc<str>,
    url: Url,
    cookie_name: Arc<str>,
    client: reqwest::Client,
}

/// Create the router forwarding each route's prefix to its upstream
///
/// Every route is behind [`require_session`]. Both `{prefix}` and anything
/// below it are forwarded, with the prefix replaced by the upstream URL's
/// path. Merge the result into the application router at its root.
///
/// ```ignore
/// let client = reqwest::Client::builder().timeout(config.proxy_timeout).build()?;
/// let app = app.merge(proxy_router(state, &config.proxy_routes, client));
/// ```
pub fn proxy_router(
    state: TokenHandlerState,
    routes: &[ProxyRoute],
    client: reqwest::Client,
) -> Router {
    let cookie_name: Arc<str> = state.manager().cookie_name().into();
    let mut router = Router::new();
    for route in routes {
        let upstream = Upstream {
            prefix: route.prefix.as_str().into(),
            url: route.upstream.clone(),
            cookie_name: cookie_name.clone(),
            client: client.clone(),
        };
        tracing::info!(prefix = %route.prefix, upstream = %route.upstream, "Proxy route");
        router = router
            .route(&route.prefix, any(forward).with_state(upstream.clone()))
            .route(
                &format!("{}/{{*rest}}", route.prefix),
                any(forward).with_state(upstream),
            );
    }
    if routes.is_empty() {
        return router;
    }
    router.route_layer(from_fn_with_state(state, require_session))
}

async fn forward(State(upstream): State<Upstream>, token: AccessToken, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let url = upstream_url(&upstream.url, &upstream.prefix, &parts.uri);

    let client_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let headers = match upstream_request_headers(
        &parts.headers,
        &upstream.cookie_name,
        &token,
        client_addr,
    ) {
        Ok(headers) => headers,
        Err(e) => {
            tracing::warn!("Cannot build the upstream request headers: {e}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let body = match to_bytes(body, MAX_PROXY_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("Request body rejected: {e}");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    tracing::debug!(method = %parts.method, %url, "Forwarding to upstream");
    let response = match upstream
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return upstream_error(&e),
    };

    let status = response.status();
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::CONTENT_LENGTH);
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => return upstream_error(&e),
    };
    tracing::debug!(%status, "Upstream responded");

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn upstream_error(e: &reqwest::Error) -> Response {
    tracing::warn!("Upstream request failed: {e}");
    if e.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT.into_response()
    } else {
        StatusCode::BAD_GATEWAY.into_response()
    }
}

/// `base` with `prefix` of the request path replaced by the base path and
/// the request's query appended.
fn upstream_url(base: &Url, prefix: &str, uri: &http::Uri) -> Url {
    let rest = uri.path().strip_prefix(prefix).unwrap_or_default();
    let path = format!("{}{rest}", base.path().trim_end_matches('/'));

    let mut url = base.clone();
    url.set_path(if path.is_empty() { "/" } else { &path });
    url.set_query(uri.query());
    url
}

fn upstream_request_headers(
    incoming: &HeaderMap,
    cookie_name: &str,
    token: &AccessToken,
    client_addr: Option<std::net::IpAddr>,
) -> Result<HeaderMap, http::header::InvalidHeaderValue> {
    let mut headers = incoming.clone();
    strip_hop_by_hop(&mut headers);
    for name in [
        header::HOST,
        header::CONTENT_LENGTH,
        header::AUTHORIZATION,
        header::COOKIE,
    ] {
        headers.remove(name);
    }

    let cookies = other_cookies(incoming, cookie_name);
    if !cookies.is_empty() {
        headers.insert(header::COOKIE, HeaderValue::from_str(&cookies)?);
    }

    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))?;
    bearer.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, bearer);

    if let Some(ip) = client_addr {
        let forwarded_for = match incoming
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip.to_string(),
        };
        headers.insert("x-forwarded-for", HeaderValue::from_str(&forwarded_for)?);
    }
    Ok(headers)
}

/// Cookie pairs of `headers` other than the session cookie, joined for a
/// single `Cookie` header.
fn other_cookies(headers: &HeaderMap, cookie_name: &str) -> String {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| {
            !pair.is_empty() && pair.split('=').next().map(str::trim) != Some(cookie_name)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in &listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
