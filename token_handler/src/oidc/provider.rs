use async_trait::async_trait;

use super::{
    errors::OidcError,
    types::{TokenSet, VerifiedIdentity},
};

/// Everything the session layer and the entry handlers need from the
/// identity provider.
#[async_trait]
pub trait OidcProvider: Send + Sync {
    /// Checks signature, issuer, audience and expiry, returning the subject.
    async fn verify_identity_token(&self, raw_token: &str) -> Result<VerifiedIdentity, OidcError>;

    /// Trades a refresh token for a new token set. The returned set keeps the
    /// old refresh token when the provider does not rotate it.
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, OidcError>;

    async fn authorization_url(&self, state: &str) -> Result<String, OidcError>;

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OidcError>;

    /// `None` when the provider has no end-session endpoint.
    async fn end_session_url(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: &str,
    ) -> Result<Option<String>, OidcError>;

    async fn fetch_userinfo(&self, access_token: &str) -> Result<serde_json::Value, OidcError>;
}
