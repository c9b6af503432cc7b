//! Email verification and password reset tokens
//!
//! Single-use tokens, stored sha256-hashed so a database leak never exposes
//! a live confirmation or reset link.

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Token type for verification flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    EmailVerification,
    PasswordReset,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::EmailVerification => "email_verification",
            TokenType::PasswordReset => "password_reset",
        }
    }
}

/// Token manager for email verification and password reset
#[derive(Clone)]
pub struct TokenManager {
    pool: PgPool,
}

impl TokenManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Generate a secure random token (32 bytes, hex-encoded)
    fn generate_token() -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let bytes: [u8; 32] = rng.gen();
        hex::encode(bytes)
    }

    /// Hash a token using SHA-256
    fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Create a new verification token.
    ///
    /// Returns the raw token (to send to the member) and stores the hash.
    pub async fn create_token(
        &self,
        user_id: Uuid,
        token_type: TokenType,
    ) -> Result<String, sqlx::Error> {
        let raw_token = Self::generate_token();
        let token_hash = Self::hash_token(&raw_token);

        // Tokens expire in 24 hours
        let expires_at = OffsetDateTime::now_utc() + Duration::hours(24);

        sqlx::query(
            r#"
            INSERT INTO verification_tokens (user_id, token_hash, token_type, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(&token_hash)
        .bind(token_type.as_str())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            token_type = %token_type.as_str(),
            expires_at = %expires_at,
            "Verification token created"
        );

        Ok(raw_token)
    }

    /// Validate and consume a token.
    ///
    /// Returns the user_id if the token is valid and marks it used.
    pub async fn validate_and_consume_token(
        &self,
        raw_token: &str,
        token_type: TokenType,
    ) -> Result<Uuid, TokenError> {
        let token_hash = Self::hash_token(raw_token);

        let record = sqlx::query_as::<_, TokenRecord>(
            r#"
            SELECT id, user_id, expires_at, used_at
            FROM verification_tokens
            WHERE token_hash = $1 AND token_type = $2
            "#,
        )
        .bind(&token_hash)
        .bind(token_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| TokenError::DatabaseError)?;

        let record = record.ok_or(TokenError::InvalidToken)?;

        if record.used_at.is_some() {
            tracing::warn!(
                token_id = %record.id,
                user_id = %record.user_id,
                "Attempted to reuse token"
            );
            return Err(TokenError::AlreadyUsed);
        }

        if OffsetDateTime::now_utc() > record.expires_at {
            tracing::warn!(
                token_id = %record.id,
                user_id = %record.user_id,
                expires_at = %record.expires_at,
                "Attempted to use expired token"
            );
            return Err(TokenError::Expired);
        }

        sqlx::query("UPDATE verification_tokens SET used_at = NOW() WHERE id = $1")
            .bind(record.id)
            .execute(&self.pool)
            .await
            .map_err(|_| TokenError::DatabaseError)?;

        tracing::info!(
            token_id = %record.id,
            user_id = %record.user_id,
            token_type = %token_type.as_str(),
            "Token validated and consumed"
        );

        Ok(record.user_id)
    }

    /// Invalidate all outstanding tokens of a type for a user, e.g. before
    /// issuing a replacement.
    pub async fn invalidate_user_tokens(
        &self,
        user_id: Uuid,
        token_type: TokenType,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE verification_tokens
            SET used_at = NOW()
            WHERE user_id = $1 AND token_type = $2 AND used_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(token_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Token validation errors
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid or unknown token")]
    InvalidToken,
    #[error("Token has already been used")]
    AlreadyUsed,
    #[error("Token has expired")]
    Expired,
    #[error("Database error")]
    DatabaseError,
}

/// Token database record
#[derive(sqlx::FromRow)]
struct TokenRecord {
    id: Uuid,
    user_id: Uuid,
    expires_at: OffsetDateTime,
    used_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_generation() {
        let token1 = TokenManager::generate_token();
        let token2 = TokenManager::generate_token();

        assert_eq!(token1.len(), 64);
        assert_ne!(token1, token2);
        assert!(token1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_token_hashing_is_stable() {
        let token = "test_token_12345";
        assert_eq!(TokenManager::hash_token(token), TokenManager::hash_token(token));
        assert_eq!(TokenManager::hash_token(token).len(), 64);
        assert_ne!(
            TokenManager::hash_token(token),
            TokenManager::hash_token("different_token")
        );
    }

    #[test]
    fn test_token_type_as_str() {
        assert_eq!(TokenType::EmailVerification.as_str(), "email_verification");
        assert_eq!(TokenType::PasswordReset.as_str(), "password_reset");
    }
}
