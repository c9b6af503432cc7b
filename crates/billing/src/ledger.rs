//! Payment ledger queries
//!
//! The ledger is the single source of truth for "has this member paid". A
//! payment is *validated* when its status is `paid` and its access window
//! (`subscribed_until`) has not lapsed. When several rows qualify, the one
//! granting the furthest-future access wins, with recency as the tie-breaker.

use sqlx::PgPool;
use time::Date;
use uuid::Uuid;

use crate::error::BillingResult;
use membrio_shared::{Payment, PaymentStatus, Product, Subscription};

/// Read-side service over the payment ledger
#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The member's current validated payment, if any
    pub async fn last_validated_payment(
        &self,
        user_id: Uuid,
        today: Date,
    ) -> BillingResult<Option<Payment>> {
        let payment: Option<Payment> = sqlx::query_as(
            r#"
            SELECT id, user_id, subscription_id, product_id, reference, token,
                   price, tax, status, error_message, subscribed_until, created_at
            FROM payments
            WHERE user_id = $1 AND status = $2 AND subscribed_until >= $3
            ORDER BY subscribed_until DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(PaymentStatus::PAID)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    /// Whether the member has any validated payment at all
    pub async fn has_validated_payment(&self, user_id: Uuid, today: Date) -> BillingResult<bool> {
        let exists: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT TRUE FROM payments
            WHERE user_id = $1 AND status = $2 AND subscribed_until >= $3
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(PaymentStatus::PAID)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;

        Ok(exists.is_some())
    }

    /// The product behind the member's current validated payment
    pub async fn current_product(
        &self,
        user_id: Uuid,
        today: Date,
    ) -> BillingResult<Option<Product>> {
        let product: Option<Product> = sqlx::query_as(
            r#"
            SELECT pr.id, pr.subscription_id, pr.name, pr.description, pr.price,
                   pr.tax_rate, pr.recurrent, pr.duration_days, pr.created_at
            FROM payments p
            JOIN products pr ON pr.id = p.product_id
            WHERE p.user_id = $1 AND p.status = $2 AND p.subscribed_until >= $3
            ORDER BY p.subscribed_until DESC, p.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(PaymentStatus::PAID)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// The subscription behind the member's current validated payment
    pub async fn current_subscription(
        &self,
        user_id: Uuid,
        today: Date,
    ) -> BillingResult<Option<Subscription>> {
        let subscription: Option<Subscription> = sqlx::query_as(
            r#"
            SELECT s.id, s.name, s.description, s.created_at
            FROM payments p
            JOIN subscriptions s ON s.id = p.subscription_id
            WHERE p.user_id = $1 AND p.status = $2 AND p.subscribed_until >= $3
            ORDER BY p.subscribed_until DESC, p.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(PaymentStatus::PAID)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// All of a member's ledger entries, newest first
    pub async fn payments_for_user(&self, user_id: Uuid) -> BillingResult<Vec<Payment>> {
        let payments: Vec<Payment> = sqlx::query_as(
            r#"
            SELECT id, user_id, subscription_id, product_id, reference, token,
                   price, tax, status, error_message, subscribed_until, created_at
            FROM payments
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }
}
