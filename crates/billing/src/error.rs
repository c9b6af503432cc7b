//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Price {0} is not an integral minor-currency amount")]
    AmountPrecision(f64),

    #[error("No payment recorded for gateway reference: {0}")]
    UnknownPayment(String),

    #[error("Notification signature verification failed")]
    SignatureInvalid,

    #[error("Malformed gateway payload: {0}")]
    InvalidPayload(String),

    #[error("Gateway API error: status={status} body={body}")]
    GatewayApi { status: u16, body: String },

    #[error("Gateway request failed: {0}")]
    GatewayTransport(String),

    #[error("Catalog item not found: {0}")]
    CatalogNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::GatewayTransport(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
