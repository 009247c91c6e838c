use std::fmt;

use thiserror::Error;

use crate::oidc::OidcError;
use crate::storage::StoreError;
use crate::utils::UtilError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    Current,
    Previous,
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Previous => write!(f, "previous"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("the {slot} session authentication key must be 32 or 64 bytes, got {len}")]
    WrongAuthSecretSize { slot: KeySlot, len: usize },

    #[error("the {slot} session encryption key must be empty, 16, 24 or 32 bytes, got {len}")]
    WrongEncSecretSize { slot: KeySlot, len: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CookieError {
    #[error("Malformed cookie: {0}")]
    Malformed(String),

    #[error("Cookie signature is not valid")]
    InvalidSignature,

    #[error("Cookie cannot be decrypted")]
    Decryption,

    #[error("Cookie encryption failed")]
    Encryption,

    #[error("Cookie has expired")]
    Expired,

    #[error("Cookie header error: {0}")]
    Header(String),
}

#[derive(Debug, Error, Clone)]
pub enum SessionError {
    #[error("Invalid session key: {0}")]
    InvalidKeySize(#[from] KeyError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot get the cookie: {0}")]
    CookieRead(CookieError),

    #[error("Cannot create a new cookie: {0}")]
    CookieWrite(CookieError),

    #[error("Cannot retrieve session from storage")]
    SessionNotFound,

    #[error("Cannot retrieve session id from the cookie")]
    SessionInvalid,

    #[error("Session subject mismatch")]
    SubjectMismatch,

    #[error("Cannot retrieve session data: {0}")]
    Retrieval(StoreError),

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("Cannot refresh the access token: {0}")]
    Refresh(OidcError),

    #[error("Identity token error: {0}")]
    Identity(OidcError),

    #[error("Utils error: {0}")]
    Utils(#[from] UtilError),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::SessionNotFound,
            StoreError::SubjectMismatch => Self::SubjectMismatch,
            other => Self::Storage(other),
        }
    }
}

impl SessionError {
    /// Whether the failure means "not logged in" rather than a server fault.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::CookieRead(_)
                | Self::SessionNotFound
                | Self::SessionInvalid
                | Self::SubjectMismatch
                | Self::Refresh(_)
                | Self::Identity(_)
        )
    }
}
