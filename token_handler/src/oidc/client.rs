use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, Validation, jwk::JwkSet};
use tokio::sync::{OnceCell, RwLock};
use url::Url;

use super::{
    config::OidcConfig,
    errors::OidcError,
    provider::OidcProvider,
    types::{IdTokenClaims, OidcDiscoveryDocument, OidcTokenResponse, TokenSet, VerifiedIdentity},
};

/// Discovery-based OIDC client for the authorization-code flow.
///
/// The discovery document is fetched on first use and cached for the life
/// of the client. Signing keys are cached too and refetched once when an ID
/// token names a key id the cache does not know.
pub struct OidcClient {
    config: OidcConfig,
    http: reqwest::Client,
    discovery: OnceCell<OidcDiscoveryDocument>,
    jwks: RwLock<Option<JwkSet>>,
}

fn get_client() -> Result<reqwest::Client, OidcError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(32)
        .build()
        .map_err(OidcError::from)
}

impl OidcClient {
    pub fn new(config: OidcConfig) -> Result<Self, OidcError> {
        Ok(Self {
            config,
            http: get_client()?,
            discovery: OnceCell::new(),
            jwks: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    pub async fn discovery(&self) -> Result<&OidcDiscoveryDocument, OidcError> {
        self.discovery
            .get_or_try_init(|| self.fetch_discovery())
            .await
    }

    async fn fetch_discovery(&self) -> Result<OidcDiscoveryDocument, OidcError> {
        let discovery_url = self.config.discovery_url();
        tracing::debug!("Fetching OIDC discovery from: {}", discovery_url);

        let response = self
            .http
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            tracing::error!("OIDC discovery failed with status: {}", response.status());
            return Err(OidcError::Discovery(response.status().to_string()));
        }

        let document: OidcDiscoveryDocument = response
            .json()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;

        let expected = self.config.issuer.trim_end_matches('/');
        if document.issuer.trim_end_matches('/') != expected {
            return Err(OidcError::Discovery(format!(
                "Issuer mismatch: discovered={}, expected={}",
                document.issuer, expected
            )));
        }

        tracing::info!("OIDC discovery successful for issuer: {}", document.issuer);
        Ok(document)
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, OidcError> {
        let jwks_uri = &self.discovery().await?.jwks_uri;
        tracing::debug!("Fetching JWKS from: {}", jwks_uri);

        let response = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::Jwks(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::Jwks(response.status().to_string()));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| OidcError::Jwks(e.to_string()))
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, OidcError> {
        if let Some(jwks) = self.jwks.read().await.as_ref() {
            if let Some(jwk) = jwks.find(kid) {
                return Ok(DecodingKey::from_jwk(jwk)?);
            }
        }

        // Unknown kid: the provider may have rotated its keys.
        let fresh = self.fetch_jwks().await?;
        let key = fresh
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()?
            .ok_or_else(|| OidcError::Jwks(format!("No signing key with kid '{kid}'")))?;
        *self.jwks.write().await = Some(fresh);
        Ok(key)
    }

    async fn request_tokens(
        &self,
        form: &[(&str, &str)],
        previous_refresh_token: Option<&str>,
        map_err: fn(String) -> OidcError,
    ) -> Result<TokenSet, OidcError> {
        let token_endpoint = &self.discovery().await?.token_endpoint;

        let response = self
            .http
            .post(token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| map_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Token endpoint responded with status: {}", status);
            return Err(map_err(status.to_string()));
        }

        let body: OidcTokenResponse = response.json().await.map_err(|e| map_err(e.to_string()))?;
        body.into_token_set(previous_refresh_token, Utc::now())
    }
}

#[async_trait]
impl OidcProvider for OidcClient {
    async fn verify_identity_token(&self, raw_token: &str) -> Result<VerifiedIdentity, OidcError> {
        let header = jsonwebtoken::decode_header(raw_token)?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| OidcError::IdToken("ID token header has no kid".to_string()))?;
        let key = self.decoding_key(kid).await?;

        let issuer = &self.discovery().await?.issuer;
        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[self.config.client_id.as_str()]);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = jsonwebtoken::decode::<IdTokenClaims>(raw_token, &key, &validation)?;
        if data.claims.sub.is_empty() {
            return Err(OidcError::IdToken("Empty subject".to_string()));
        }

        Ok(VerifiedIdentity {
            subject: data.claims.sub,
            raw_token: raw_token.to_string(),
        })
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, OidcError> {
        tracing::debug!("Refreshing access token");
        self.request_tokens(
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ],
            Some(refresh_token),
            OidcError::Refresh,
        )
        .await
    }

    async fn authorization_url(&self, state: &str) -> Result<String, OidcError> {
        let endpoint = &self.discovery().await?.authorization_endpoint;
        let mut url = Url::parse(endpoint)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", self.config.client_id.as_str())
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("scope", &self.config.scope_param())
            .append_pair("state", state);
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OidcError> {
        self.request_tokens(
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ],
            None,
            OidcError::TokenExchange,
        )
        .await
    }

    async fn end_session_url(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: &str,
    ) -> Result<Option<String>, OidcError> {
        let Some(endpoint) = &self.discovery().await?.end_session_endpoint else {
            return Ok(None);
        };
        let mut url = Url::parse(endpoint)?;
        url.query_pairs_mut()
            .append_pair("id_token_hint", id_token_hint)
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
        Ok(Some(url.into()))
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<serde_json::Value, OidcError> {
        let endpoint = self
            .discovery()
            .await?
            .userinfo_endpoint
            .as_deref()
            .ok_or_else(|| OidcError::UserInfo("Provider has no userinfo endpoint".to_string()))?;

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OidcError::UserInfo(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::UserInfo(response.status().to_string()));
        }

        response
            .json()
            .await
            .map_err(|e| OidcError::UserInfo(e.to_string()))
    }
}
