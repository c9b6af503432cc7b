//! Authentication routes

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{
        hash_password, validate_password_strength, verify_password, AuthUser, TokenError,
        TokenManager, VerificationTokenType,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};
use membrio_shared::Accreditation;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub accreditation: i32,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a new member. The account starts unvalidated; a confirmation
/// token is mailed out and consumed by `verify_email`.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let username = req.username.trim();
    let email = req.email.trim().to_lowercase();

    if username.is_empty() {
        return Err(ApiError::Validation("Username is required".to_string()));
    }
    if !email.contains('@') {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }
    validate_password_strength(&req.password)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        ApiError::Internal
    })?;

    let user_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO users (username, email, password_hash, accreditation)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(username)
    .bind(&email)
    .bind(&password_hash)
    .bind(Accreditation::Unvalidated.level())
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::EmailAlreadyExists,
        other => other,
    })?;

    let tokens = TokenManager::new(state.pool.clone());
    let token = tokens
        .create_token(user_id, VerificationTokenType::EmailVerification)
        .await?;
    state.mail.send_confirmation(&email, username, &token).await;

    tracing::info!(user_id = %user_id, "Member registered");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Account created, check your inbox to confirm your email".to_string(),
        }),
    ))
}

/// Consume a confirmation token and raise the member to Validated
pub async fn verify_email(
    State(state): State<AppState>,
    Json(req): Json<VerifyEmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let tokens = TokenManager::new(state.pool.clone());
    let user_id = tokens
        .validate_and_consume_token(&req.token, VerificationTokenType::EmailVerification)
        .await
        .map_err(token_error)?;

    membrio_billing::accreditation::mark_email_validated(&state.pool, user_id).await?;

    Ok(Json(MessageResponse {
        message: "Email confirmed".to_string(),
    }))
}

/// Issue a fresh confirmation token. The response never discloses whether
/// the address is registered.
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(req): Json<ResendVerificationRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let email = req.email.trim().to_lowercase();

    let user: Option<(Uuid, String, i32)> =
        sqlx::query_as("SELECT id, username, accreditation FROM users WHERE email = $1")
            .bind(&email)
            .fetch_optional(&state.pool)
            .await?;

    if let Some((user_id, username, accreditation)) = user {
        if Accreditation::from_level(accreditation) == Accreditation::Unvalidated {
            let tokens = TokenManager::new(state.pool.clone());
            tokens
                .invalidate_user_tokens(user_id, VerificationTokenType::EmailVerification)
                .await?;
            let token = tokens
                .create_token(user_id, VerificationTokenType::EmailVerification)
                .await?;
            state.mail.send_confirmation(&email, &username, &token).await;
        }
    }

    Ok(Json(MessageResponse {
        message: "If the address is registered, a confirmation email is on its way".to_string(),
    }))
}

/// Log in with email and password
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = req.email.trim().to_lowercase();

    let user: Option<(Uuid, String, String, i32)> = sqlx::query_as(
        "SELECT id, username, password_hash, accreditation FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?;

    let (user_id, username, password_hash, accreditation) =
        user.ok_or(ApiError::InvalidCredentials)?;

    let valid = verify_password(&req.password, &password_hash).map_err(|e| {
        tracing::error!(error = %e, "Stored password hash unreadable");
        ApiError::Internal
    })?;
    if !valid {
        return Err(ApiError::InvalidCredentials);
    }

    let access_token = state
        .jwt
        .generate_access_token(user_id, &email, accreditation)
        .map_err(|e| {
            tracing::error!(error = %e, "Token generation failed");
            ApiError::Internal
        })?;

    Ok(Json(AuthResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expiry_seconds(),
        user: UserResponse {
            id: user_id,
            username,
            email,
            accreditation,
        },
    }))
}

/// Request a password reset. The response never discloses whether the
/// address is registered.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let email = req.email.trim().to_lowercase();

    let user: Option<(Uuid, String)> =
        sqlx::query_as("SELECT id, username FROM users WHERE email = $1")
            .bind(&email)
            .fetch_optional(&state.pool)
            .await?;

    if let Some((user_id, username)) = user {
        let tokens = TokenManager::new(state.pool.clone());
        tokens
            .invalidate_user_tokens(user_id, VerificationTokenType::PasswordReset)
            .await?;
        let token = tokens
            .create_token(user_id, VerificationTokenType::PasswordReset)
            .await?;
        state
            .mail
            .send_password_reset(&email, &username, &token)
            .await;
    }

    Ok(Json(MessageResponse {
        message: "If the address is registered, a reset email is on its way".to_string(),
    }))
}

/// Consume a reset token and set the new password
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    validate_password_strength(&req.password)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let tokens = TokenManager::new(state.pool.clone());
    let user_id = tokens
        .validate_and_consume_token(&req.token, VerificationTokenType::PasswordReset)
        .await
        .map_err(token_error)?;

    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        ApiError::Internal
    })?;

    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(&password_hash)
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    tokens
        .invalidate_user_tokens(user_id, VerificationTokenType::PasswordReset)
        .await?;

    tracing::info!(user_id = %user_id, "Password reset");

    Ok(Json(MessageResponse {
        message: "Password updated".to_string(),
    }))
}

/// The authenticated member's own profile
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<UserResponse>> {
    let (username,): (String,) = sqlx::query_as("SELECT username FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(UserResponse {
        id: user.id,
        username,
        email: user.email,
        accreditation: user.accreditation.level(),
    }))
}

fn token_error(err: TokenError) -> ApiError {
    match err {
        TokenError::DatabaseError => ApiError::Internal,
        _ => ApiError::InvalidToken,
    }
}
