//! Tamper-evident cookie encoding.
//!
//! A cookie value is `<timestamp>.<body>.<mac>`, all parts base64url except
//! the decimal timestamp. `body` is the JSON payload, AES-GCM sealed as
//! `nonce || ciphertext` when the key pair has an encryption key. `mac` is
//! HMAC-SHA256 over `<name>|<timestamp>|<body>`, so a value cannot be moved
//! to a cookie of another name.

use aes_gcm::{
    Aes128Gcm, Aes256Gcm, AesGcm, Nonce,
    aead::{Aead, KeyInit, consts::U12},
    aes::Aes192,
};
use chrono::{DateTime, Utc};
use headers::HeaderMapExt;
use hmac::{Hmac, Mac};
use http::header::{HeaderMap, HeaderValue, SET_COOKIE};
use sha2::Sha256;

use super::keys::{KeyPair, KeyPairSet};
use crate::session::{errors::CookieError, types::CookiePayload};
use crate::utils::{base64url_decode, base64url_encode, gen_random_bytes};

type HmacSha256 = Hmac<Sha256>;
type Aes192Gcm = AesGcm<Aes192, U12>;

const NONCE_LEN: usize = 12;

/// Timestamps this far ahead of the server clock are still accepted.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

enum CookieCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl CookieCipher {
    /// Key sizes were checked when the [`KeyPairSet`] was built.
    fn new(key: &[u8]) -> Option<Self> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).ok().map(Self::Aes128),
            24 => Aes192Gcm::new_from_slice(key).ok().map(Self::Aes192),
            32 => Aes256Gcm::new_from_slice(key).ok().map(Self::Aes256),
            _ => None,
        }
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CookieError> {
        let nonce_bytes = gen_random_bytes(NONCE_LEN).map_err(|_| CookieError::Encryption)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = match self {
            Self::Aes128(c) => c.encrypt(nonce, plaintext),
            Self::Aes192(c) => c.encrypt(nonce, plaintext),
            Self::Aes256(c) => c.encrypt(nonce, plaintext),
        }
        .map_err(|_| CookieError::Encryption)?;

        let mut out = nonce_bytes;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CookieError> {
        if sealed.len() <= NONCE_LEN {
            return Err(CookieError::Decryption);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        match self {
            Self::Aes128(c) => c.decrypt(nonce, ciphertext),
            Self::Aes192(c) => c.decrypt(nonce, ciphertext),
            Self::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| CookieError::Decryption)
    }
}

struct CookieKey {
    mac_key: Vec<u8>,
    cipher: Option<CookieCipher>,
}

impl CookieKey {
    fn new(pair: &KeyPair) -> Self {
        Self {
            mac_key: pair.authentication_key.clone(),
            cipher: CookieCipher::new(&pair.encryption_key),
        }
    }

    fn mac(&self, name: &str, timestamp: i64, body: &str) -> Result<HmacSha256, CookieError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|e| CookieError::Malformed(e.to_string()))?;
        mac.update(format!("{name}|{timestamp}|{body}").as_bytes());
        Ok(mac)
    }

    fn encode(
        &self,
        name: &str,
        payload: &CookiePayload,
        now: DateTime<Utc>,
    ) -> Result<String, CookieError> {
        let json = serde_json::to_vec(payload).map_err(|e| CookieError::Malformed(e.to_string()))?;
        let body = match &self.cipher {
            Some(cipher) => base64url_encode(&cipher.seal(&json)?),
            None => base64url_encode(&json),
        };
        let timestamp = now.timestamp();
        let tag = self.mac(name, timestamp, &body)?.finalize().into_bytes();
        Ok(format!("{timestamp}.{body}.{}", base64url_encode(&tag)))
    }

    fn decode(&self, name: &str, value: &str) -> Result<(CookiePayload, i64), CookieError> {
        let mut parts = value.split('.');
        let (Some(timestamp), Some(body), Some(tag), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CookieError::Malformed("expected three parts".to_string()));
        };
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| CookieError::Malformed("invalid timestamp".to_string()))?;
        let tag = base64url_decode(tag).map_err(|e| CookieError::Malformed(e.to_string()))?;

        self.mac(name, timestamp, body)?
            .verify_slice(&tag)
            .map_err(|_| CookieError::InvalidSignature)?;

        let raw = base64url_decode(body).map_err(|e| CookieError::Malformed(e.to_string()))?;
        let json = match &self.cipher {
            Some(cipher) => cipher.open(&raw)?,
            None => raw,
        };
        let payload =
            serde_json::from_slice(&json).map_err(|e| CookieError::Malformed(e.to_string()))?;
        Ok((payload, timestamp))
    }
}

/// Encodes, decodes and writes the session cookie.
pub(crate) struct CookieCodec {
    name: String,
    domain: String,
    keys: Vec<CookieKey>,
    login_ttl_secs: i64,
    session_ttl_secs: i64,
}

impl CookieCodec {
    pub(crate) fn new(
        name: &str,
        domain: &str,
        keys: &KeyPairSet,
        login_ttl_secs: i64,
        session_ttl_secs: i64,
    ) -> Self {
        Self {
            name: name.to_string(),
            domain: domain.to_string(),
            keys: keys.pairs().map(CookieKey::new).collect(),
            login_ttl_secs,
            session_ttl_secs,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Cookie lifetime for a payload kind, in seconds.
    pub(crate) fn ttl_secs(&self, payload: &CookiePayload) -> i64 {
        match payload {
            CookiePayload::PendingLogin { .. } => self.login_ttl_secs,
            CookiePayload::Authenticated { .. } => self.session_ttl_secs,
        }
    }

    /// Always signs (and encrypts) with the current pair.
    pub(crate) fn encode(
        &self,
        payload: &CookiePayload,
        now: DateTime<Utc>,
    ) -> Result<String, CookieError> {
        let current = self
            .keys
            .first()
            .ok_or_else(|| CookieError::Malformed("no cookie keys configured".to_string()))?;
        current.encode(&self.name, payload, now)
    }

    /// Tries the current pair, then the previous one, and rejects values
    /// older than the TTL of their payload kind.
    pub(crate) fn decode(&self, value: &str, now: DateTime<Utc>) -> Result<CookiePayload, CookieError> {
        let mut last_error = CookieError::InvalidSignature;
        for (index, key) in self.keys.iter().enumerate() {
            match key.decode(&self.name, value) {
                Ok((payload, issued_at)) => {
                    if index > 0 {
                        tracing::debug!("Session cookie accepted with the previous key pair");
                    }
                    self.check_age(&payload, issued_at, now)?;
                    return Ok(payload);
                }
                Err(err) => last_error = err,
            }
        }
        Err(last_error)
    }

    fn check_age(
        &self,
        payload: &CookiePayload,
        issued_at: i64,
        now: DateTime<Utc>,
    ) -> Result<(), CookieError> {
        let now = now.timestamp();
        if issued_at > now.saturating_add(MAX_CLOCK_SKEW_SECS) {
            return Err(CookieError::Malformed("timestamp in the future".to_string()));
        }
        if now.saturating_sub(issued_at) > self.ttl_secs(payload) {
            return Err(CookieError::Expired);
        }
        Ok(())
    }

    /// Cookie value from the request's `Cookie` headers, if any.
    pub(crate) fn read(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .typed_get::<headers::Cookie>()
            .and_then(|cookie| cookie.get(&self.name).map(str::to_string))
            .filter(|value| !value.is_empty())
    }

    /// A `Set-Cookie` header carrying `value` for `max_age` seconds. A
    /// negative `max_age` asks the browser to drop the cookie.
    pub(crate) fn set_cookie_header(
        &self,
        value: &str,
        max_age: i64,
    ) -> Result<HeaderMap, CookieError> {
        let mut cookie = format!("{}={value}; Path=/", self.name);
        if !self.domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", self.domain));
        }
        cookie.push_str(&format!("; Max-Age={max_age}; HttpOnly; Secure; SameSite=Strict"));

        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_str(&cookie)
                .map_err(|_| CookieError::Header("Failed to parse cookie".to_string()))?,
        );
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn pair(auth: u8, enc_len: usize) -> KeyPair {
        KeyPair::new(vec![auth; 32], vec![auth; enc_len])
    }

    fn codec(current: KeyPair, previous: Option<KeyPair>) -> CookieCodec {
        CookieCodec::new(
            "session",
            "localhost",
            &KeyPairSet::new(current, previous).unwrap(),
            300,
            1800,
        )
    }

    fn authenticated(id: &str) -> CookiePayload {
        CookiePayload::Authenticated {
            session_id: id.to_string(),
        }
    }

    #[test]
    fn test_round_trip_for_each_encryption_size() {
        let now = Utc::now();
        for enc_len in [0, 16, 24, 32] {
            let codec = codec(pair(1, enc_len), None);
            let value = codec.encode(&authenticated("id-1"), now).unwrap();
            assert_eq!(codec.decode(&value, now).unwrap(), authenticated("id-1"), "{enc_len}");
        }
    }

    #[test]
    fn test_encrypted_value_hides_payload() {
        let now = Utc::now();
        let plain = codec(pair(1, 0), None)
            .encode(&authenticated("visible-id"), now)
            .unwrap();
        let sealed = codec(pair(1, 32), None)
            .encode(&authenticated("visible-id"), now)
            .unwrap();

        let body = |v: &str| base64url_decode(v.split('.').nth(1).unwrap()).unwrap();
        assert!(String::from_utf8_lossy(&body(&plain)).contains("visible-id"));
        assert!(!String::from_utf8_lossy(&body(&sealed)).contains("visible-id"));
    }

    #[test]
    fn test_previous_pair_reads_cookies_issued_before_rotation() {
        // Given a cookie issued under pair A
        let now = Utc::now();
        let a = pair(1, 16);
        let b = pair(2, 32);
        let old_value = codec(a.clone(), None)
            .encode(&authenticated("id-a"), now)
            .unwrap();

        // When B becomes current and A previous
        let rotated = codec(b.clone(), Some(a));

        // Then the old cookie still decodes
        assert_eq!(rotated.decode(&old_value, now).unwrap(), authenticated("id-a"));

        // And a codec that only knows B rejects it
        assert!(codec(b, None).decode(&old_value, now).is_err());
    }

    #[test]
    fn test_cookie_from_unknown_pair_is_rejected() {
        let now = Utc::now();
        let value = codec(pair(9, 0), None)
            .encode(&authenticated("id"), now)
            .unwrap();
        assert_eq!(
            codec(pair(1, 0), Some(pair(2, 0))).decode(&value, now),
            Err(CookieError::InvalidSignature)
        );
    }

    #[test]
    fn test_value_is_bound_to_cookie_name() {
        let now = Utc::now();
        let keys = KeyPairSet::new(pair(1, 0), None).unwrap();
        let other = CookieCodec::new("other", "localhost", &keys, 300, 1800);
        let value = other.encode(&authenticated("id"), now).unwrap();
        assert_eq!(
            codec(pair(1, 0), None).decode(&value, now),
            Err(CookieError::InvalidSignature)
        );
    }

    #[test]
    fn test_age_is_checked_per_payload_kind() {
        let codec = codec(pair(1, 16), None);
        let issued = Utc::now();
        let pending = CookiePayload::PendingLogin {
            state: "s".to_string(),
        };
        let login_value = codec.encode(&pending, issued).unwrap();
        let session_value = codec.encode(&authenticated("id"), issued).unwrap();

        // Ten minutes later: past the login timeout, inside the session timeout
        let later = issued + Duration::minutes(10);
        assert_eq!(codec.decode(&login_value, later), Err(CookieError::Expired));
        assert!(codec.decode(&session_value, later).is_ok());

        // An hour later both are stale
        let much_later = issued + Duration::hours(1);
        assert_eq!(
            codec.decode(&session_value, much_later),
            Err(CookieError::Expired)
        );

        // A value stamped far in the future is refused
        let future = codec.encode(&pending, issued + Duration::hours(2)).unwrap();
        assert!(matches!(
            codec.decode(&future, issued),
            Err(CookieError::Malformed(_))
        ));
    }

    #[test]
    fn test_malformed_values() {
        let codec = codec(pair(1, 0), None);
        let now = Utc::now();
        for value in ["", "abc", "1.2", "x.aGk.aGk", "1.2.3.4"] {
            assert!(codec.decode(value, now).is_err(), "{value}");
        }
    }

    #[test]
    fn test_set_cookie_header_attributes() {
        let codec = codec(pair(1, 0), None);
        let headers = codec.set_cookie_header("v", 1800).unwrap();
        assert_eq!(
            headers.get(SET_COOKIE).unwrap(),
            "session=v; Path=/; Domain=localhost; Max-Age=1800; HttpOnly; Secure; SameSite=Strict"
        );

        let keys = KeyPairSet::new(pair(1, 0), None).unwrap();
        let no_domain = CookieCodec::new("session", "", &keys, 300, 1800);
        let headers = no_domain.set_cookie_header("", -1).unwrap();
        assert_eq!(
            headers.get(SET_COOKIE).unwrap(),
            "session=; Path=/; Max-Age=-1; HttpOnly; Secure; SameSite=Strict"
        );
    }

    #[test]
    fn test_read_picks_named_cookie() {
        let codec = codec(pair(1, 0), None);
        let mut headers = HeaderMap::new();
        assert_eq!(codec.read(&headers), None);

        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc.def.ghi"),
        );
        assert_eq!(codec.read(&headers).as_deref(), Some("abc.def.ghi"));
    }

    proptest! {
        #[test]
        fn prop_any_altered_character_is_rejected(index in 0usize..200, replacement in "[A-Za-z0-9_-]") {
            let codec = codec(pair(1, 16), None);
            let now = Utc::now();
            let value = codec.encode(&authenticated("4f1c2b9e-session"), now).unwrap();
            let index = index % value.len();
            let original = &value[index..index + 1];
            prop_assume!(original != replacement && original != ".");

            let mut tampered = value.clone();
            tampered.replace_range(index..index + 1, &replacement);
            prop_assert!(codec.decode(&tampered, now).is_err());
        }
    }
}
