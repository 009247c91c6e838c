use crate::session::errors::{KeyError, KeySlot};

/// Signing key and optional encryption key for session cookies.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeyPair {
    pub authentication_key: Vec<u8>,
    /// Empty means cookies are signed but not encrypted.
    pub encryption_key: Vec<u8>,
}

impl KeyPair {
    pub fn new(authentication_key: impl Into<Vec<u8>>, encryption_key: impl Into<Vec<u8>>) -> Self {
        Self {
            authentication_key: authentication_key.into(),
            encryption_key: encryption_key.into(),
        }
    }

    fn validate(&self, slot: KeySlot) -> Result<(), KeyError> {
        let len = self.authentication_key.len();
        if len != 32 && len != 64 {
            return Err(KeyError::WrongAuthSecretSize { slot, len });
        }
        let len = self.encryption_key.len();
        if !matches!(len, 0 | 16 | 24 | 32) {
            return Err(KeyError::WrongEncSecretSize { slot, len });
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("authentication_key_len", &self.authentication_key.len())
            .field("encryption_key_len", &self.encryption_key.len())
            .finish()
    }
}

/// At most two key pairs: the one used for new cookies, and the one that
/// was current before the last rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairSet {
    current: KeyPair,
    previous: Option<KeyPair>,
}

impl KeyPairSet {
    /// A previous pair with an empty authentication key is ignored.
    pub fn new(current: KeyPair, previous: Option<KeyPair>) -> Result<Self, KeyError> {
        current.validate(KeySlot::Current)?;
        let previous = match previous {
            Some(pair) if !pair.authentication_key.is_empty() => {
                pair.validate(KeySlot::Previous)?;
                Some(pair)
            }
            _ => None,
        };
        Ok(Self { current, previous })
    }

    /// Makes `next` current and demotes the current pair. The old previous
    /// pair is dropped.
    pub fn rotate(self, next: KeyPair) -> Result<Self, KeyError> {
        Self::new(next, Some(self.current))
    }

    pub fn current(&self) -> &KeyPair {
        &self.current
    }

    pub fn previous(&self) -> Option<&KeyPair> {
        self.previous.as_ref()
    }

    /// Pairs in the order they are tried when reading a cookie.
    pub fn pairs(&self) -> impl Iterator<Item = &KeyPair> {
        std::iter::once(&self.current).chain(self.previous.as_ref())
    }
}
