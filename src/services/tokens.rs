//! Single-use tokens mailed for email verification and password resets.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hex::encode as hex_encode;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;

pub const TOKEN_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    VerifyEmail,
    ResetPassword,
}

impl TokenPurpose {
    pub const fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::VerifyEmail => "verify_email",
            TokenPurpose::ResetPassword => "reset_password",
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token not found")]
    NotFound,
    #[error("token has expired")]
    Expired,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// 32 random bytes, base64url encoded without padding.
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Only the digest is stored, so a leaked table cannot be replayed.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex_encode(hasher.finalize())
}

pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > expires_at
}

/// Replaces any live token for `identifier` and `purpose` with a fresh one
/// and returns its plain value.
pub async fn issue_token(
    pool: &PgPool,
    identifier: &str,
    purpose: TokenPurpose,
) -> Result<String, sqlx::Error> {
    let token = generate_token_value();
    let expires_at = Utc::now() + Duration::minutes(TOKEN_TTL_MINUTES);

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        DELETE FROM verification_tokens
        WHERE identifier = $1 AND purpose = $2
        "#,
    )
    .bind(identifier)
    .bind(purpose.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO verification_tokens (identifier, token_hash, purpose, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(identifier)
    .bind(hash_token(&token))
    .bind(purpose.as_str())
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    debug!(purpose = purpose.as_str(), "issued verification token");
    Ok(token)
}

/// Identifier (email) the token was issued for, if it exists and is live.
pub async fn find_valid_token(
    pool: &PgPool,
    token: &str,
    purpose: TokenPurpose,
) -> Result<String, TokenError> {
    let record: Option<(String, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT identifier, expires_at
        FROM verification_tokens
        WHERE token_hash = $1 AND purpose = $2
        "#,
    )
    .bind(hash_token(token))
    .bind(purpose.as_str())
    .fetch_optional(pool)
    .await?;

    let Some((identifier, expires_at)) = record else {
        return Err(TokenError::NotFound);
    };
    if is_expired(expires_at, Utc::now()) {
        return Err(TokenError::Expired);
    }
    Ok(identifier)
}

pub async fn delete_token(pool: &PgPool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        DELETE FROM verification_tokens
        WHERE token_hash = $1
        "#,
    )
    .bind(hash_token(token))
    .execute(pool)
    .await
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_url_safe_and_unique() {
        let first = generate_token_value();
        let second = generate_token_value();
        assert_eq!(first.len(), 43);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(first, second);
    }

    #[test]
    fn hash_is_stable_hex_digest() {
        let digest = hash_token("abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest, hash_token("abc"));
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let deadline = Utc::now();
        assert!(!is_expired(deadline, deadline));
        assert!(is_expired(deadline, deadline + Duration::seconds(1)));
        assert!(!is_expired(deadline, deadline - Duration::minutes(5)));
    }
}
