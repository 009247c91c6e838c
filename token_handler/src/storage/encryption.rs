use std::sync::Arc;

use super::{errors::StoreError, types::SessionRecord};
use crate::cipher::HexCipher;

/// Optional cipher applied to the three token columns. The subject stays in
/// clear text so it can be indexed and compared by the update statement.
#[derive(Clone, Default)]
pub(super) struct TokenSealer {
    cipher: Option<Arc<dyn HexCipher>>,
}

impl TokenSealer {
    pub(super) fn new(cipher: Option<Arc<dyn HexCipher>>) -> Self {
        Self { cipher }
    }

    pub(super) fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub(super) fn seal(&self, record: &SessionRecord) -> Result<SessionRecord, StoreError> {
        let Some(cipher) = &self.cipher else {
            return Ok(record.clone());
        };
        Ok(SessionRecord {
            subject: record.subject.clone(),
            access_token: cipher.encrypt_to_hex_string(record.access_token.as_bytes())?,
            refresh_token: cipher.encrypt_to_hex_string(record.refresh_token.as_bytes())?,
            id_token: cipher.encrypt_to_hex_string(record.id_token.as_bytes())?,
            expires_at: record.expires_at,
        })
    }

    pub(super) fn open(&self, record: SessionRecord) -> Result<SessionRecord, StoreError> {
        let Some(cipher) = &self.cipher else {
            return Ok(record);
        };
        Ok(SessionRecord {
            access_token: open_field(cipher.as_ref(), &record.access_token)?,
            refresh_token: open_field(cipher.as_ref(), &record.refresh_token)?,
            id_token: open_field(cipher.as_ref(), &record.id_token)?,
            ..record
        })
    }
}

fn open_field(cipher: &dyn HexCipher, value: &str) -> Result<String, StoreError> {
    let bytes = cipher.decrypt_from_hex_string(value)?;
    String::from_utf8(bytes)
        .map_err(|e| StoreError::Storage(format!("decrypted token is not UTF-8: {e}")))
}
