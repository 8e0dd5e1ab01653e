//! Session Cookie Codec
//!
//! Stateless, tamper-evident tokens carrying a JSON object and the time they
//! were minted. Nothing is stored server-side; a cookie is valid while it
//! decrypts under our key and its timestamp sits inside the window.
//!
//! Cookie format: base64(nonce[12] ‖ tag[16] ‖ AES-256-GCM(json)) with `+`→`@`
//! and `/`→`$` so it survives URLs and cookie headers unescaped.
//!
//! Older cookies used base64(iv[16] ‖ AES-256-CBC(hmac_sha384[48] ‖ json)).
//! Those are still accepted on decode but never produced.

use std::fmt;

use aes::Aes256;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use meshward_common::constants::cookie::{
    DEFAULT_TIMEOUT_MINUTES, FUTURE_SKEW_MS, GCM_KEY_LEN, KEY_LEN, LEGACY_KEY_LEN,
};
use rand::Rng;
use serde_json::{Map, Value};
use sha2::Sha384;
use thiserror::Error;

type HmacSha384 = Hmac<Sha384>;
type LegacyDecryptor = cbc::Decryptor<Aes256>;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const LEGACY_IV_LEN: usize = 16;
const LEGACY_DIGEST_LEN: usize = 48;

/// Decoded cookie contents. `time` is in milliseconds and `dtime` is its age.
pub type CookiePayload = Map<String, Value>;

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie key too short: {0} bytes")]
    KeyTooShort(usize),

    #[error("invalid hex key: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid cookie encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("cookie too short")]
    Truncated,

    #[error("cookie failed authentication")]
    Cipher,

    #[error("bad cookie padding")]
    Padding,

    #[error("cookie digest mismatch")]
    Digest,

    #[error("invalid cookie payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cookie payload is not an object")]
    NotAnObject,

    #[error("cookie has no numeric time")]
    MissingTime,

    #[error("cookie time {0} is out of range")]
    TimeOutOfRange(f64),

    #[error("cookie expired ({age_ms} ms old)")]
    Expired { age_ms: i64 },

    #[error("cookie minted {ahead_ms} ms in the future")]
    FromFuture { ahead_ms: i64 },
}

/// Raw key material. The first 32 bytes key AES-GCM; the legacy scheme
/// needs all 80 (HMAC key 0..48, CBC key 48..80).
#[derive(Clone, PartialEq, Eq)]
pub struct CookieKey(Vec<u8>);

impl CookieKey {
    /// Fresh random key large enough for both schemes
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; KEY_LEN];
        rand::rng().fill(&mut bytes[..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, CookieError> {
        Ok(Self(hex::decode(hex_key.trim())?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CookieKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CookieKey({} bytes, redacted)", self.0.len())
    }
}

fn to_wire(bytes: &[u8]) -> String {
    STANDARD.encode(bytes).replace('+', "@").replace('/', "$")
}

fn from_wire(cookie: &str) -> Result<Vec<u8>, CookieError> {
    let standard = cookie.trim().replace('@', "+").replace('$', "/");
    Ok(STANDARD.decode(standard)?)
}

/// Encodes and validates session cookies under one key
#[derive(Debug, Clone)]
pub struct CookieCodec {
    key: CookieKey,
    timeout_minutes: u64,
}

impl CookieCodec {
    pub fn new(key: CookieKey) -> Result<Self, CookieError> {
        if key.len() < GCM_KEY_LEN {
            return Err(CookieError::KeyTooShort(key.len()));
        }
        Ok(Self {
            key,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
        })
    }

    /// Default validity window used by [`CookieCodec::decode`]
    pub fn with_timeout(mut self, minutes: u64) -> Self {
        self.timeout_minutes = minutes;
        self
    }

    pub fn key(&self) -> &CookieKey {
        &self.key
    }

    pub fn timeout_minutes(&self) -> u64 {
        self.timeout_minutes
    }

    /// Stamp `payload` with the current time and seal it
    pub fn encode(&self, payload: CookiePayload) -> Result<String, CookieError> {
        self.encode_at(payload, chrono::Utc::now().timestamp())
    }

    pub fn encode_at(&self, mut payload: CookiePayload, now_secs: i64) -> Result<String, CookieError> {
        payload.insert("time".to_string(), Value::from(now_secs));
        let mut buffer = serde_json::to_vec(&payload)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce[..]);

        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(&self.key.as_bytes()[..GCM_KEY_LEN])
            .map_err(|_| CookieError::KeyTooShort(self.key.len()))?;
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| CookieError::Cipher)?;

        let mut raw = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(tag.as_slice());
        raw.extend_from_slice(&buffer);

        Ok(to_wire(&raw))
    }

    /// Payload of a valid cookie, `None` otherwise
    pub fn decode(&self, cookie: &str) -> Option<CookiePayload> {
        self.decode_with_timeout(cookie, self.timeout_minutes)
    }

    pub fn decode_with_timeout(&self, cookie: &str, timeout_minutes: u64) -> Option<CookiePayload> {
        self.decode_at(cookie, timeout_minutes, chrono::Utc::now().timestamp_millis())
    }

    pub fn decode_at(&self, cookie: &str, timeout_minutes: u64, now_ms: i64) -> Option<CookiePayload> {
        match self.try_decode_at(cookie, timeout_minutes, now_ms) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::debug!(error = %e, "Cookie rejected");
                None
            }
        }
    }

    pub fn try_decode_at(
        &self,
        cookie: &str,
        timeout_minutes: u64,
        now_ms: i64,
    ) -> Result<CookiePayload, CookieError> {
        let raw = from_wire(cookie)?;

        let json = match self.open_gcm(&raw) {
            Ok(json) => json,
            Err(gcm_error) => {
                tracing::trace!(error = %gcm_error, "Not an AES-GCM cookie, trying legacy format");
                self.open_legacy(&raw)?
            }
        };

        let payload = match serde_json::from_slice::<Value>(&json)? {
            Value::Object(map) => map,
            _ => return Err(CookieError::NotAnObject),
        };

        check_window(payload, timeout_minutes, now_ms)
    }

    fn open_gcm(&self, raw: &[u8]) -> Result<Vec<u8>, CookieError> {
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CookieError::Truncated);
        }
        let (nonce, rest) = raw.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(&self.key.as_bytes()[..GCM_KEY_LEN])
            .map_err(|_| CookieError::KeyTooShort(self.key.len()))?;

        let mut buffer = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut buffer, Tag::from_slice(tag))
            .map_err(|_| CookieError::Cipher)?;

        Ok(buffer)
    }

    fn open_legacy(&self, raw: &[u8]) -> Result<Vec<u8>, CookieError> {
        let key = self.key.as_bytes();
        if key.len() < LEGACY_KEY_LEN {
            return Err(CookieError::KeyTooShort(key.len()));
        }
        if raw.len() <= LEGACY_IV_LEN {
            return Err(CookieError::Truncated);
        }
        let (iv, ciphertext) = raw.split_at(LEGACY_IV_LEN);

        let decryptor = LegacyDecryptor::new_from_slices(&key[LEGACY_DIGEST_LEN..LEGACY_KEY_LEN], iv)
            .map_err(|_| CookieError::Cipher)?;
        let plaintext = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CookieError::Padding)?;

        if plaintext.len() < LEGACY_DIGEST_LEN {
            return Err(CookieError::Truncated);
        }
        let (digest, json) = plaintext.split_at(LEGACY_DIGEST_LEN);

        let mut mac = <HmacSha384 as Mac>::new_from_slice(&key[..LEGACY_DIGEST_LEN])
            .map_err(|_| CookieError::KeyTooShort(key.len()))?;
        mac.update(json);
        mac.verify_slice(digest).map_err(|_| CookieError::Digest)?;

        Ok(json.to_vec())
    }
}

/// Largest cookie time, in ms, that still fits an `i64` after conversion
const MAX_TIME_MS: f64 = 9.0e18;

/// Enforce the validity window and rewrite `time` to milliseconds
fn check_window(
    mut payload: CookiePayload,
    timeout_minutes: u64,
    now_ms: i64,
) -> Result<CookiePayload, CookieError> {
    let secs = payload
        .get("time")
        .and_then(Value::as_f64)
        .ok_or(CookieError::MissingTime)?;

    let time_ms = secs * 1000.0;
    if !time_ms.is_finite() || time_ms.abs() >= MAX_TIME_MS {
        return Err(CookieError::TimeOutOfRange(secs));
    }
    let time_ms = time_ms as i64;
    let dtime = now_ms.saturating_sub(time_ms);

    let timeout_ms = i64::try_from(timeout_minutes)
        .unwrap_or(i64::MAX)
        .saturating_mul(60_000);
    if dtime > timeout_ms {
        return Err(CookieError::Expired { age_ms: dtime });
    }
    if dtime < -FUTURE_SKEW_MS {
        return Err(CookieError::FromFuture { ahead_ms: dtime.saturating_neg() });
    }

    payload.insert("time".to_string(), Value::from(time_ms));
    payload.insert("dtime".to_string(), Value::from(dtime));
    Ok(payload)
}
