//! Session cookies.
//!
//! Implements:
//! - Authenticated, time-boxed cookie encode/decode (AES-GCM, legacy CBC+HMAC)
//! - Login tokens and the shared login key

mod codec;
mod login;

pub use codec::{CookieCodec, CookieError, CookieKey, CookiePayload};
pub use login::{
    issue_login_token, load_or_create_login_key, login_token_user, mint_login_token,
    mint_login_token_with_redis,
};

/// 80 random bytes, enough for both cookie schemes
pub fn generate_cookie_key() -> CookieKey {
    CookieKey::generate()
}
