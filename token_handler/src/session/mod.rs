mod config;
mod errors;
mod main;
mod types;

pub use config::{
    DEFAULT_COOKIE_DOMAIN, DEFAULT_COOKIE_NAME, DEFAULT_LOGIN_TIMEOUT, DEFAULT_SESSION_TIMEOUT,
    DEFAULT_SWEEP_INTERVAL, SessionConfig,
};
pub use errors::{CookieError, KeyError, KeySlot, SessionError};
pub use main::{KeyPair, KeyPairSet, Session, SessionManager, purge_expired};
pub use types::{AuthState, CookiePayload};
