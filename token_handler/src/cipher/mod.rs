//! At-rest encryption for the token columns of the session store.

mod errors;
mod gcm;

pub use errors::CipherError;
pub use gcm::AesGcmHexCipher;

/// Symmetric cipher whose ciphertext travels as lowercase hex text.
///
/// Implementations encrypt with their current key and may accept ciphertext
/// produced by an earlier key when decrypting.
pub trait HexCipher: Send + Sync {
    fn encrypt_to_hex_string(&self, plaintext: &[u8]) -> Result<String, CipherError>;
    fn decrypt_from_hex_string(&self, ciphertext: &str) -> Result<Vec<u8>, CipherError>;
}
