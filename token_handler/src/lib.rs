//! Backend-for-frontend OIDC token handler.
//!
//! Keeps access, refresh and identity tokens server-side and gives the
//! browser only a signed (optionally encrypted) session cookie. The pieces:
//!
//! * [`SessionStore`] with SQLite and PostgreSQL engines, encrypting token
//!   columns through a [`HexCipher`] that supports a previous key
//! * [`KeyPairSet`] and the session cookie codec, also with key rotation
//! * [`Session`] handles produced by a [`SessionManager`], which also runs
//!   the background purge of expired records
//! * [`OidcProvider`], implemented by the discovery-based [`OidcClient`]
//! * [`TokenHandlerConfig`], loading all of the above from the environment

mod cipher;
mod config;
mod oidc;
mod session;
mod storage;
mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cipher::{AesGcmHexCipher, CipherError, HexCipher};
pub use config::{ConfigError, ProxyRoute, TokenHandlerConfig};
pub use oidc::{
    OidcClient, OidcConfig, OidcDiscoveryDocument, OidcError, OidcProvider, TokenSet,
    VerifiedIdentity,
};
pub use session::{
    AuthState, CookieError, CookiePayload, DEFAULT_COOKIE_DOMAIN, DEFAULT_COOKIE_NAME,
    DEFAULT_LOGIN_TIMEOUT, DEFAULT_SESSION_TIMEOUT, DEFAULT_SWEEP_INTERVAL, KeyError, KeyPair,
    KeyPairSet, KeySlot, Session, SessionConfig, SessionError, SessionManager, purge_expired,
};
pub use storage::{
    DB_TABLE_SESSIONS, PostgresSessionStore, SessionRecord, SessionStore, SharedSessionStore,
    SqliteSessionStore, StoreConfig, StoreError, StoreKind, connect_store,
};
pub use utils::{UtilError, gen_random_string};
