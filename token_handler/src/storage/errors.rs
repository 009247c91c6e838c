use sqlx::error::ErrorKind;
use thiserror::Error;

use crate::cipher::CipherError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Session not found")]
    NotFound,

    #[error("Subject of the stored session differs from the update")]
    SubjectMismatch,

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Schema validation failed: {0}")]
    Schema(String),

    #[error("Unsupported store type: {0}")]
    UnsupportedStoreType(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db_err)
                if matches!(
                    db_err.kind(),
                    ErrorKind::CheckViolation
                        | ErrorKind::NotNullViolation
                        | ErrorKind::UniqueViolation
                ) =>
            {
                Self::ConstraintViolation(db_err.message().to_string())
            }
            _ => Self::Storage(err.to_string()),
        }
    }
}
