//! Drives `OidcClient` against a local mock identity provider.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;

use token_handler::{OidcClient, OidcConfig, OidcError, OidcProvider};

const CLIENT_ID: &str = "client-1";

struct IdpState {
    issuer: String,
    keys: Mutex<Vec<(String, Vec<u8>)>>,
    jwks_fetches: AtomicUsize,
    with_end_session: bool,
}

impl IdpState {
    fn sign(&self, kid: &str, secret: &[u8], sub: &str, aud: &str) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        let claims = json!({
            "iss": self.issuer,
            "aud": aud,
            "sub": sub,
            "exp": chrono::Utc::now().timestamp() + 300,
            "iat": chrono::Utc::now().timestamp(),
        });
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn current_key(&self) -> (String, Vec<u8>) {
        self.keys.lock().unwrap()[0].clone()
    }
}

async fn discovery(State(state): State<Arc<IdpState>>) -> Json<serde_json::Value> {
    let base = &state.issuer;
    let mut doc = json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "jwks_uri": format!("{base}/jwks"),
        "userinfo_endpoint": format!("{base}/userinfo"),
    });
    if state.with_end_session {
        doc["end_session_endpoint"] = json!(format!("{base}/logout"));
    }
    Json(doc)
}

async fn jwks(State(state): State<Arc<IdpState>>) -> Json<serde_json::Value> {
    state.jwks_fetches.fetch_add(1, Ordering::SeqCst);
    let keys: Vec<_> = state
        .keys
        .lock()
        .unwrap()
        .iter()
        .map(|(kid, secret)| {
            json!({"kty": "oct", "kid": kid, "alg": "HS256", "k": URL_SAFE_NO_PAD.encode(secret)})
        })
        .collect();
    Json(json!({ "keys": keys }))
}

async fn token(
    State(state): State<Arc<IdpState>>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let (kid, secret) = state.current_key();
    let id_token = state.sign(&kid, &secret, "alice", CLIENT_ID);
    match (
        form.get("grant_type").map(String::as_str),
        form.get("code").map(String::as_str),
    ) {
        (Some("authorization_code"), Some("good-code")) => (
            StatusCode::OK,
            Json(json!({
                "access_token": "at-1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt-1",
                "id_token": id_token,
            })),
        ),
        (Some("refresh_token"), _) if form.get("refresh_token").map(String::as_str) == Some("rt-1") => (
            StatusCode::OK,
            Json(json!({
                "access_token": "at-2",
                "token_type": "Bearer",
                "id_token": id_token,
            })),
        ),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant"})),
        ),
    }
}

async fn userinfo(headers: HeaderMap) -> impl IntoResponse {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer at-1") => (StatusCode::OK, Json(json!({"sub": "alice", "email": "alice@example.com"}))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({}))),
    }
}

async fn start_idp(with_end_session: bool) -> (Arc<IdpState>, OidcClient) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let issuer = format!("http://{}", listener.local_addr().unwrap());
    let state = Arc::new(IdpState {
        issuer: issuer.clone(),
        keys: Mutex::new(vec![("k1".to_string(), b"first-secret-0123456789abcdef!!".to_vec())]),
        jwks_fetches: AtomicUsize::new(0),
        with_end_session,
    });

    let app = Router::new()
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/jwks", get(jwks))
        .route("/token", post(token))
        .route("/userinfo", get(userinfo))
        .with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = OidcClient::new(OidcConfig {
        issuer,
        client_id: CLIENT_ID.to_string(),
        client_secret: "client-secret".to_string(),
        redirect_url: "http://localhost:9080/callback".to_string(),
        scopes: vec!["openid".to_string(), "profile".to_string()],
    })
    .unwrap();

    (state, client)
}

#[tokio::test]
async fn test_authorization_url_carries_flow_parameters() {
    let (state, client) = start_idp(true).await;

    let url = client.authorization_url("state-123").await.unwrap();
    let parsed = url::Url::parse(&url).unwrap();
    let query: HashMap<_, _> = parsed.query_pairs().into_owned().collect();

    assert!(url.starts_with(&format!("{}/authorize?", state.issuer)));
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["client_id"], CLIENT_ID);
    assert_eq!(query["redirect_uri"], "http://localhost:9080/callback");
    assert_eq!(query["scope"], "openid profile");
    assert_eq!(query["state"], "state-123");
}

#[tokio::test]
async fn test_exchange_code_then_verify_identity() {
    // Given a mock provider issuing signed ID tokens
    let (_state, client) = start_idp(true).await;

    // When exchanging a valid code
    let tokens = client.exchange_code("good-code").await.unwrap();

    // Then the token set is complete and the ID token verifies
    assert_eq!(tokens.access_token, "at-1");
    assert_eq!(tokens.refresh_token, "rt-1");
    assert!(tokens.expires_at > chrono::Utc::now() + chrono::Duration::minutes(59));

    let identity = client.verify_identity_token(&tokens.id_token).await.unwrap();
    assert_eq!(identity.subject, "alice");
    assert_eq!(identity.raw_token, tokens.id_token);
}

#[tokio::test]
async fn test_exchange_with_bad_code_fails() {
    let (_state, client) = start_idp(true).await;
    assert!(matches!(
        client.exchange_code("bad-code").await,
        Err(OidcError::TokenExchange(_))
    ));
}

#[tokio::test]
async fn test_refresh_keeps_refresh_token_when_not_rotated() {
    let (_state, client) = start_idp(true).await;

    let tokens = client.refresh_access_token("rt-1").await.unwrap();
    assert_eq!(tokens.access_token, "at-2");
    assert_eq!(tokens.refresh_token, "rt-1");

    assert!(matches!(
        client.refresh_access_token("revoked").await,
        Err(OidcError::Refresh(_))
    ));
}

#[tokio::test]
async fn test_verify_rejects_wrong_audience_and_signature() {
    let (state, client) = start_idp(true).await;
    let (kid, secret) = state.current_key();

    let other_audience = state.sign(&kid, &secret, "alice", "someone-else");
    assert!(matches!(
        client.verify_identity_token(&other_audience).await,
        Err(OidcError::IdToken(_))
    ));

    let forged = state.sign(&kid, b"attacker-secret-0123456789abcdef", "alice", CLIENT_ID);
    assert!(matches!(
        client.verify_identity_token(&forged).await,
        Err(OidcError::IdToken(_))
    ));
}

#[tokio::test]
async fn test_jwks_refetched_once_on_unknown_kid() {
    let (state, client) = start_idp(true).await;
    let (kid, secret) = state.current_key();

    // Given a warm key cache
    let token = state.sign(&kid, &secret, "alice", CLIENT_ID);
    client.verify_identity_token(&token).await.unwrap();
    client.verify_identity_token(&token).await.unwrap();
    assert_eq!(state.jwks_fetches.load(Ordering::SeqCst), 1);

    // When the provider rotates to a new key
    let new_secret = b"second-secret-0123456789abcdef!".to_vec();
    state
        .keys
        .lock()
        .unwrap()
        .insert(0, ("k2".to_string(), new_secret.clone()));
    let rotated = state.sign("k2", &new_secret, "bob", CLIENT_ID);

    // Then the client refetches and accepts the new key
    assert_eq!(
        client.verify_identity_token(&rotated).await.unwrap().subject,
        "bob"
    );
    assert_eq!(state.jwks_fetches.load(Ordering::SeqCst), 2);

    // And a kid nobody knows is refused after one more fetch
    let unknown = state.sign("k9", &new_secret, "bob", CLIENT_ID);
    assert!(matches!(
        client.verify_identity_token(&unknown).await,
        Err(OidcError::Jwks(_))
    ));
    assert_eq!(state.jwks_fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_end_session_url() {
    let (state, client) = start_idp(true).await;
    let url = client
        .end_session_url("the-id-token", "http://localhost:9080/")
        .await
        .unwrap()
        .unwrap();
    let parsed = url::Url::parse(&url).unwrap();
    let query: HashMap<_, _> = parsed.query_pairs().into_owned().collect();
    assert!(url.starts_with(&format!("{}/logout?", state.issuer)));
    assert_eq!(query["id_token_hint"], "the-id-token");
    assert_eq!(query["post_logout_redirect_uri"], "http://localhost:9080/");

    let (_state, client) = start_idp(false).await;
    assert_eq!(client.end_session_url("t", "http://x/").await.unwrap(), None);
}

#[tokio::test]
async fn test_fetch_userinfo() {
    let (_state, client) = start_idp(true).await;
    let info = client.fetch_userinfo("at-1").await.unwrap();
    assert_eq!(info["email"], "alice@example.com");

    assert!(matches!(
        client.fetch_userinfo("stale").await,
        Err(OidcError::UserInfo(_))
    ));
}

#[tokio::test]
async fn test_discovery_failure_is_reported() {
    let client = OidcClient::new(OidcConfig {
        issuer: "http://127.0.0.1:9".to_string(),
        client_id: CLIENT_ID.to_string(),
        client_secret: "s".to_string(),
        redirect_url: "http://localhost/callback".to_string(),
        scopes: vec!["openid".to_string()],
    })
    .unwrap();
    assert!(matches!(
        client.authorization_url("s").await,
        Err(OidcError::Discovery(_))
    ));
}
