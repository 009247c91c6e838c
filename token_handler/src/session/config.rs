use std::time::Duration;

use super::{errors::SessionError, main::KeyPair};

pub const DEFAULT_COOKIE_NAME: &str = "session";
pub const DEFAULT_COOKIE_DOMAIN: &str = "localhost";
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

const MAX_TIMEOUT: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Settings of the session layer.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// Empty means no `Domain` attribute.
    pub cookie_domain: String,
    pub current_keys: KeyPair,
    pub previous_keys: Option<KeyPair>,
    /// Cookie lifetime while a login is pending.
    pub login_timeout: Duration,
    /// Cookie lifetime once authenticated, also the sweep retention.
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
}

impl SessionConfig {
    pub fn new(current_keys: KeyPair) -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_domain: DEFAULT_COOKIE_DOMAIN.to_string(),
            current_keys,
            previous_keys: None,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SessionError> {
        if self.cookie_name.is_empty()
            || !self
                .cookie_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
        {
            return Err(SessionError::Configuration(format!(
                "invalid cookie name: {:?}",
                self.cookie_name
            )));
        }
        for (name, value) in [
            ("login timeout", self.login_timeout),
            ("session timeout", self.session_timeout),
            ("sweep interval", self.sweep_interval),
        ] {
            if value.as_secs() == 0 || value > MAX_TIMEOUT {
                return Err(SessionError::Configuration(format!(
                    "{name} must be between 1 second and {} seconds",
                    MAX_TIMEOUT.as_secs()
                )));
            }
        }
        Ok(())
    }
}

/// Whole seconds of a validated timeout.
pub(crate) fn whole_secs(value: Duration) -> i64 {
    i64::try_from(value.as_secs()).unwrap_or(i64::MAX)
}
