//! Authentication for the Membrio API

pub mod jwt;
pub mod password;
pub mod tokens;

pub use jwt::{Claims, JwtManager};
pub use password::{hash_password, validate_password_strength, verify_password};
pub use tokens::{TokenError, TokenManager, TokenType as VerificationTokenType};

use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use membrio_shared::Accreditation;

/// The authenticated member behind a request.
///
/// Extracted from the bearer token; the accreditation level is read fresh
/// from the user row rather than trusted from the claims, since a payment
/// notification may have moved it since the token was issued.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub accreditation: Accreditation,
}

impl AuthUser {
    /// Gate a handler on a minimum accreditation level
    pub fn require(&self, level: Accreditation) -> Result<(), ApiError> {
        if self.accreditation >= level {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        let claims = state
            .jwt
            .validate_token(token)
            .map_err(|_| ApiError::Unauthorized)?;

        let row: Option<(String, i32)> =
            sqlx::query_as("SELECT email, accreditation FROM users WHERE id = $1")
                .bind(claims.sub)
                .fetch_optional(&state.pool)
                .await?;

        let (email, accreditation) = row.ok_or(ApiError::Unauthorized)?;

        Ok(AuthUser {
            id: claims.sub,
            email,
            accreditation: Accreditation::from_level(accreditation),
        })
    }
}
