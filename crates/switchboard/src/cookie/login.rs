//! Login tokens and the login cookie key.

use anyhow::{Context, Result};
use meshward_common::UserId;
use meshward_common::constants::cookie::{KEY_LEN, LOGIN_TOKEN_ACCESS};
use meshward_common::constants::redis_keys;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;

use super::codec::{CookieCodec, CookieError, CookiePayload, CookieKey};

/// Short-lived cookie that logs `user` in
pub fn issue_login_token(codec: &CookieCodec, user: &UserId) -> Result<String, CookieError> {
    let mut payload = CookiePayload::new();
    payload.insert("u".to_string(), Value::from(user.as_str()));
    payload.insert("a".to_string(), Value::from(LOGIN_TOKEN_ACCESS));
    codec.encode(payload)
}

/// Login token for a user id given as text, e.g. from the command line
pub fn mint_login_token(codec: &CookieCodec, user: &str) -> Result<String> {
    let user = UserId::parse(user).with_context(|| format!("Invalid user id: {}", user))?;
    issue_login_token(codec, &user).context("Failed to encode login token")
}

/// Mint a login token with the shared key stored in Redis
pub async fn mint_login_token_with_redis(
    redis_url: &str,
    timeout_minutes: u64,
    user: &str,
) -> Result<String> {
    let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
    let mut redis = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    let key = load_or_create_login_key(&mut redis).await?;
    let codec = CookieCodec::new(key)
        .context("Login cookie key rejected")?
        .with_timeout(timeout_minutes);
    mint_login_token(&codec, user)
}

/// User a decoded login cookie was issued for
pub fn login_token_user(payload: &CookiePayload) -> Option<UserId> {
    payload
        .get("u")
        .and_then(Value::as_str)
        .and_then(|u| UserId::parse(u).ok())
}

/// Shared login key: reuse the one in Redis, or mint and store a new one
pub async fn load_or_create_login_key(redis: &mut ConnectionManager) -> Result<CookieKey> {
    let stored: Option<String> = redis
        .get(redis_keys::LOGIN_COOKIE_KEY)
        .await
        .context("Failed to read login cookie key")?;

    if let Some(hex_key) = stored.filter(|k| k.trim().len() >= KEY_LEN * 2) {
        match CookieKey::from_hex(&hex_key) {
            Ok(key) => {
                tracing::debug!("Loaded login cookie key from Redis");
                return Ok(key);
            }
            Err(e) => tracing::warn!(error = %e, "Stored login cookie key is invalid, replacing it"),
        }
    }

    let key = CookieKey::generate();
    let _: () = redis
        .set(redis_keys::LOGIN_COOKIE_KEY, key.to_hex())
        .await
        .context("Failed to store login cookie key")?;

    tracing::info!("Generated new login cookie key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_token_carries_user_and_access() {
        let codec = CookieCodec::new(CookieKey::generate()).unwrap();
        let user = UserId::parse("user//admin").unwrap();

        let token = issue_login_token(&codec, &user).unwrap();
        let payload = codec.decode(&token).unwrap();

        assert_eq!(payload["a"], 3);
        assert_eq!(login_token_user(&payload), Some(user));
    }

    #[test]
    fn test_mint_login_token_checks_user_id() {
        let codec = CookieCodec::new(CookieKey::generate()).unwrap();

        assert!(mint_login_token(&codec, "node//n1").is_err());
        assert!(mint_login_token(&codec, "admin").is_err());

        let token = mint_login_token(&codec, "user//admin").unwrap();
        let payload = codec.decode(&token).unwrap();
        assert_eq!(payload["u"], "user//admin");
    }

    #[test]
    fn test_login_token_user_requires_user_id() {
        let mut payload = CookiePayload::new();
        assert_eq!(login_token_user(&payload), None);

        payload.insert("u".to_string(), Value::from("node//abc"));
        assert_eq!(login_token_user(&payload), None);
    }
}
