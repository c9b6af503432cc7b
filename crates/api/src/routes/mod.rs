//! API routes

pub mod auth;
pub mod catalog;
pub mod health;
pub mod payments;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check at root level for infrastructure monitoring
    let health_routes = Router::new().route("/health", get(health::health));

    // Public routes (no auth required)
    let public_api_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/resend-verification", post(auth::resend_verification))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        // Gateway notifications are public but signature-verified
        .route("/payments/notifications", post(payments::notification));

    // Routes requiring a bearer token (via the AuthUser extractor)
    let member_api_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/subscriptions", get(catalog::list_subscriptions))
        .route("/payments/checkout", post(payments::checkout))
        .route("/payments", get(payments::list_payments))
        .route("/payments/unsubscribe", post(payments::unsubscribe));

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", public_api_routes.merge(member_api_routes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
