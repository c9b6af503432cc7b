//! Payment routes: checkout, the member's ledger view, unsubscribe, and the
//! gateway notification endpoint.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};
use membrio_billing::{BillingError, NotificationOutcome, SIGNATURE_HEADER};
use membrio_shared::{Accreditation, Product, Subscription, User};

use super::auth::MessageResponse;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub subscription: String,
    pub product: String,
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub reference: String,
    pub payment_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub reference: String,
    pub status: String,
    pub price: f64,
    pub tax: f64,
    pub subscribed_until: Date,
    pub error_message: Option<String>,
    pub created_at: time::OffsetDateTime,
}

// =============================================================================
// Handlers
// =============================================================================

/// Start a hosted checkout for a catalog product
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    user.require(Accreditation::Validated)?;

    let subscription: Option<Subscription> = sqlx::query_as(
        "SELECT id, name, description, created_at FROM subscriptions WHERE name = $1",
    )
    .bind(&req.subscription)
    .fetch_optional(&state.pool)
    .await?;
    let subscription = subscription.ok_or(ApiError::NotFound)?;

    let product: Option<Product> = sqlx::query_as(
        r#"
        SELECT id, subscription_id, name, description, price, tax_rate,
               recurrent, duration_days, created_at
        FROM products
        WHERE subscription_id = $1 AND name = $2
        "#,
    )
    .bind(subscription.id)
    .bind(&req.product)
    .fetch_optional(&state.pool)
    .await?;
    let product = product.ok_or(ApiError::NotFound)?;

    let full_user: User = sqlx::query_as(
        r#"
        SELECT id, username, email, password_hash, accreditation, created_at, updated_at
        FROM users WHERE id = $1
        "#,
    )
    .bind(user.id)
    .fetch_one(&state.pool)
    .await?;

    let created = state
        .charges
        .create_classic_payment(
            &full_user,
            &subscription,
            &product,
            req.return_url,
            req.cancel_url,
        )
        .await?;

    Ok(Json(CheckoutResponse {
        reference: created.reference,
        payment_url: created.hosted_payment_url,
    }))
}

/// The member's ledger entries, newest first
pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<PaymentResponse>>> {
    let payments = state.ledger.payments_for_user(user.id).await?;

    let response = payments
        .into_iter()
        .map(|p| PaymentResponse {
            status: p.status().to_string(),
            reference: p.reference,
            price: p.price,
            tax: p.tax,
            subscribed_until: p.subscribed_until,
            error_message: p.error_message,
            created_at: p.created_at,
        })
        .collect();

    Ok(Json(response))
}

/// Cancel the member's subscription
pub async fn unsubscribe(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<MessageResponse>> {
    user.require(Accreditation::Paying)?;

    membrio_billing::unsubscribe(&state.pool, user.id).await?;

    Ok(Json(MessageResponse {
        message: "Subscription cancelled".to_string(),
    }))
}

/// Gateway notification endpoint (public, signature-verified).
///
/// Unverifiable payloads are rejected with 400 before any storage is
/// touched; everything the reconciliation engine absorbs is acknowledged
/// with 200 so the gateway stops re-delivering.
pub async fn notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Gateway notification missing signature header");
            ApiError::BadRequest("Missing notification signature".to_string())
        })?;

    let payload = state
        .gateway
        .parse_notification(body.as_bytes(), signature)
        .map_err(|e| {
            tracing::warn!(error = %e, "Gateway notification rejected");
            ApiError::BadRequest("Invalid notification".to_string())
        })?;

    let outcome = state.engine.handle_notification(&payload).await.map_err(
        |e| match e {
            BillingError::UnknownPayment(ref reference) => {
                tracing::warn!(reference = %reference, "Notification for unknown payment");
                ApiError::NotFound
            }
            other => ApiError::from(other),
        },
    )?;

    // Anomalies are reported through logs/alerts; the gateway still gets a
    // 200 so it does not keep re-delivering a payload we will never apply.
    tracing::debug!(reference = %payload.id, outcome = ?outcome, "Notification handled");

    Ok(StatusCode::OK)
}
