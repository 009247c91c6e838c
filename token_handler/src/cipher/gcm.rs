use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};

use super::{CipherError, HexCipher};
use crate::utils::gen_random_bytes;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM cipher with an optional previous key for records written
/// before a key rotation.
///
/// Output layout is `hex(nonce || ciphertext || tag)` with a fresh random
/// 96-bit nonce per call.
pub struct AesGcmHexCipher {
    current: Aes256Gcm,
    previous: Option<Aes256Gcm>,
}

impl AesGcmHexCipher {
    pub fn new(current: &[u8], previous: Option<&[u8]>) -> Result<Self, CipherError> {
        let current = build_key(current)?;
        let previous = match previous {
            Some(key) if !key.is_empty() => Some(build_key(key)?),
            _ => None,
        };
        Ok(Self { current, previous })
    }

    /// Builds a cipher from configuration strings.
    ///
    /// Returns `Ok(None)` when no key is configured at all, which means the
    /// store keeps tokens in plaintext.
    pub fn from_keys(current: &str, previous: &str) -> Result<Option<Self>, CipherError> {
        match (current.is_empty(), previous.is_empty()) {
            (true, true) => Ok(None),
            (true, false) => Err(CipherError::MissingCurrentKey),
            (false, _) => Self::new(current.as_bytes(), Some(previous.as_bytes())).map(Some),
        }
    }

    pub fn has_previous_key(&self) -> bool {
        self.previous.is_some()
    }
}

fn build_key(key: &[u8]) -> Result<Aes256Gcm, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength {
        expected: KEY_LEN,
        actual: key.len(),
    })
}

impl HexCipher for AesGcmHexCipher {
    fn encrypt_to_hex_string(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let nonce_bytes = gen_random_bytes(NONCE_LEN).map_err(|_| CipherError::Encrypt)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .current
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut out = nonce_bytes;
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    fn decrypt_from_hex_string(&self, ciphertext: &str) -> Result<Vec<u8>, CipherError> {
        let raw = hex::decode(ciphertext).map_err(|e| CipherError::Format(e.to_string()))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Format(format!(
                "ciphertext too short: {} bytes",
                raw.len()
            )));
        }
        let (nonce_bytes, sealed) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        if let Ok(plaintext) = self.current.decrypt(nonce, sealed) {
            return Ok(plaintext);
        }
        if let Some(previous) = &self.previous {
            if let Ok(plaintext) = previous.decrypt(nonce, sealed) {
                tracing::debug!("Decrypted stored value with the previous key");
                return Ok(plaintext);
            }
        }
        Err(CipherError::Decrypt)
    }
}
