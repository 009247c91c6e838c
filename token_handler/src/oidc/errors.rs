use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OidcError {
    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Token exchange error: {0}")]
    TokenExchange(String),

    #[error("Token refresh error: {0}")]
    Refresh(String),

    #[error("Id token error: {0}")]
    IdToken(String),

    #[error("JWKS error: {0}")]
    Jwks(String),

    #[error("Fetch user info error: {0}")]
    UserInfo(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP client error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for OidcError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for OidcError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::IdToken(err.to_string())
    }
}

impl From<url::ParseError> for OidcError {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration(err.to_string())
    }
}
