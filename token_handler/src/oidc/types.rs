use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::OidcError;

/// Access tokens without `expires_in` are treated as valid for this long.
const DEFAULT_EXPIRES_IN_SECS: i64 = 300;

/// Tokens returned by the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub raw_token: String,
}

/// OIDC Discovery Document, reduced to the fields the client uses.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OidcDiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub userinfo_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct OidcTokenResponse {
    pub(super) access_token: String,
    pub(super) expires_in: Option<i64>,
    pub(super) refresh_token: Option<String>,
    pub(super) id_token: Option<String>,
}

impl OidcTokenResponse {
    /// Converts a token endpoint response. `previous_refresh_token` is kept
    /// when the response carries none.
    pub(super) fn into_token_set(
        self,
        previous_refresh_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TokenSet, OidcError> {
        let id_token = self
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OidcError::IdToken("ID token not present in response".to_string()))?;

        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh_token.map(str::to_string))
            .ok_or_else(|| {
                OidcError::TokenExchange("Refresh token not present in response".to_string())
            })?;

        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
            + Duration::seconds(expires_in);

        Ok(TokenSet {
            access_token: self.access_token,
            refresh_token,
            id_token,
            expires_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct IdTokenClaims {
    pub(super) sub: String,
}
