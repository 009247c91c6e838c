//! Process configuration read from environment variables.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::cipher::{AesGcmHexCipher, CipherError, HexCipher};
use crate::oidc::OidcConfig;
use crate::session::{
    DEFAULT_COOKIE_DOMAIN, DEFAULT_COOKIE_NAME, DEFAULT_LOGIN_TIMEOUT, DEFAULT_SESSION_TIMEOUT,
    DEFAULT_SWEEP_INTERVAL, KeyError, KeyPair, KeyPairSet, SessionConfig,
};
use crate::storage::{StoreConfig, StoreError, StoreKind};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9080";
const DEFAULT_AUTH_SECRET: &str = "my-secret-key-CHANGE-ME-IN-PROD!";
const DEFAULT_SQLITE_URL: &str = "sqlite:sessions.db";
const DEFAULT_SCOPES: &str = "openid profile email";
const DB_KEY_LEN: usize = 32;
const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a mandatory parameter is missing: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("the cookie domain shouldn't be 'localhost' in production")]
    DefaultCookieDomainInProduction,

    #[error("the session authentication secret should be changed to a random value in production")]
    DefaultAuthSecretInProduction,

    #[error("the database encryption key must have a size of 32 bytes")]
    WrongDbKeySize,

    #[error(transparent)]
    Keys(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Path prefix forwarded to an upstream API with the session's access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// Starts with `/`, no trailing `/`.
    pub prefix: String,
    pub upstream: Url,
}

/// Everything the token handler needs to start.
#[derive(Clone)]
pub struct TokenHandlerConfig {
    pub is_production: bool,
    pub listen_addr: String,
    pub session: SessionConfig,
    pub store: StoreConfig,
    pub db_key: String,
    pub old_db_key: String,
    pub oidc: OidcConfig,
    pub post_login_redirect_url: String,
    pub post_logout_redirect_url: String,
    pub proxy_routes: Vec<ProxyRoute>,
    pub proxy_timeout: Duration,
}

impl TokenHandlerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, which returns `None` for unset names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let get_or = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let is_production = match get("IS_PRODUCTION") {
            Some(v) => parse_bool("IS_PRODUCTION", &v)?,
            None => false,
        };

        let cookie_domain = get_or("COOKIE_DOMAIN", DEFAULT_COOKIE_DOMAIN);
        let auth_secret = get_or("SESSION_AUTH_SECRET", DEFAULT_AUTH_SECRET);
        if is_production && cookie_domain == DEFAULT_COOKIE_DOMAIN {
            return Err(ConfigError::DefaultCookieDomainInProduction);
        }
        if is_production && auth_secret == DEFAULT_AUTH_SECRET {
            return Err(ConfigError::DefaultAuthSecretInProduction);
        }

        let current_keys = KeyPair::new(
            auth_secret.into_bytes(),
            get_or("SESSION_ENC_SECRET", "").into_bytes(),
        );
        let previous_keys = get("SESSION_OLD_AUTH_SECRET").map(|auth| {
            KeyPair::new(
                auth.into_bytes(),
                get_or("SESSION_OLD_ENC_SECRET", "").into_bytes(),
            )
        });
        // Fail at load time rather than when the manager starts.
        KeyPairSet::new(current_keys.clone(), previous_keys.clone())?;

        let db_key = get_or("SESSION_DB_KEY", "");
        let old_db_key = get_or("SESSION_OLD_DB_KEY", "");
        for key in [&db_key, &old_db_key] {
            if !key.is_empty() && key.len() != DB_KEY_LEN {
                return Err(ConfigError::WrongDbKeySize);
            }
        }

        let session = SessionConfig {
            cookie_name: get_or("COOKIE_NAME", DEFAULT_COOKIE_NAME),
            cookie_domain,
            current_keys,
            previous_keys,
            login_timeout: parse_secs(&get, "SESSION_LOGIN_TIMEOUT", DEFAULT_LOGIN_TIMEOUT)?,
            session_timeout: parse_secs(&get, "SESSION_TIMEOUT", DEFAULT_SESSION_TIMEOUT)?,
            sweep_interval: parse_secs(&get, "SESSION_SWEEP_INTERVAL", DEFAULT_SWEEP_INTERVAL)?,
        };

        let kind: StoreKind = get_or("SESSION_STORE_TYPE", "sqlite").parse()?;
        let store_url = match (kind, get("SESSION_STORE_URL")) {
            (_, Some(url)) => url,
            (StoreKind::Sqlite, None) => DEFAULT_SQLITE_URL.to_string(),
            (StoreKind::Postgres, None) => return Err(ConfigError::Missing("SESSION_STORE_URL")),
        };

        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));
        let oidc = OidcConfig {
            issuer: required("OIDC_ISSUER")?,
            client_id: required("OIDC_CLIENT_ID")?,
            client_secret: required("OIDC_CLIENT_SECRET")?,
            redirect_url: required("OIDC_REDIRECT_URL")?,
            scopes: get_or("OIDC_SCOPES", DEFAULT_SCOPES)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        };
        if !oidc.scopes.iter().any(|s| s == "openid") {
            return Err(ConfigError::Invalid {
                name: "OIDC_SCOPES",
                reason: "must include 'openid'".to_string(),
            });
        }

        let proxy_routes = match get("PROXY_ROUTES") {
            Some(v) => parse_proxy_routes(&v)?,
            None => Vec::new(),
        };

        Ok(Self {
            is_production,
            listen_addr: get_or("LISTEN_ADDR", DEFAULT_LISTEN_ADDR),
            session,
            store: StoreConfig::new(kind, store_url),
            db_key,
            old_db_key,
            oidc,
            post_login_redirect_url: get_or("OIDC_POST_LOGIN_REDIRECT_URL", "/"),
            post_logout_redirect_url: get_or("OIDC_POST_LOGOUT_REDIRECT_URL", "/"),
            proxy_routes,
            proxy_timeout: parse_secs(&get, "PROXY_TIMEOUT", DEFAULT_PROXY_TIMEOUT)?,
        })
    }

    /// Cipher for the store's token columns, `None` when no DB key is set.
    pub fn store_cipher(&self) -> Result<Option<Arc<dyn HexCipher>>, CipherError> {
        let cipher = AesGcmHexCipher::from_keys(&self.db_key, &self.old_db_key)?;
        Ok(cipher.map(|c| Arc::new(c) as Arc<dyn HexCipher>))
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for TokenHandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenHandlerConfig")
            .field("is_production", &self.is_production)
            .field("listen_addr", &self.listen_addr)
            .field("session", &self.session)
            .field("store_kind", &self.store.kind)
            .field("store_encrypted", &!self.db_key.is_empty())
            .field("oidc", &self.oidc)
            .field("proxy_routes", &self.proxy_routes)
            .finish_non_exhaustive()
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            name,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

/// Parses `PROXY_ROUTES`: comma separated `prefix=upstream` pairs, e.g.
/// `/api/orders=http://orders:8080,/api/users=https://users.internal/v1`.
fn parse_proxy_routes(value: &str) -> Result<Vec<ProxyRoute>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "PROXY_ROUTES",
        reason,
    };

    let mut routes: Vec<ProxyRoute> = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (prefix, upstream) = entry
            .split_once('=')
            .ok_or_else(|| invalid(format!("'{entry}' is not a prefix=upstream pair")))?;

        let prefix = prefix.trim().trim_end_matches('/');
        if !prefix.starts_with('/') {
            return Err(invalid(format!(
                "prefix of '{entry}' must start with '/' and not be the root"
            )));
        }
        if prefix.contains(['{', '}', '*']) {
            return Err(invalid(format!("prefix of '{entry}' must be a plain path")));
        }
        if routes.iter().any(|r| r.prefix == prefix) {
            return Err(invalid(format!("prefix '{prefix}' is listed twice")));
        }

        let upstream = Url::parse(upstream.trim())
            .map_err(|e| invalid(format!("upstream of '{entry}': {e}")))?;
        if !matches!(upstream.scheme(), "http" | "https") || upstream.host_str().is_none() {
            return Err(invalid(format!(
                "upstream of '{entry}' must be an http or https URL"
            )));
        }

        routes.push(ProxyRoute {
            prefix: prefix.to_string(),
            upstream,
        });
    }
    Ok(routes)
}

fn parse_secs(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(v) => match v.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("'{v}' is not a positive number of seconds"),
            }),
        },
    }
}
