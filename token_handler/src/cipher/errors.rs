use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Encryption key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("A previous encryption key was given without a current key")]
    MissingCurrentKey,

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed with every configured key")]
    Decrypt,

    #[error("Invalid ciphertext: {0}")]
    Format(String),
}
