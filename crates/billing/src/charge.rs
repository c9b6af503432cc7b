//! Charge-attempt creation
//!
//! Classic (member-initiated, hosted checkout) and recurring
//! (merchant-initiated, stored card) charges. Both paths write exactly one
//! pending ledger row after the gateway accepts the charge and leave
//! finalization to the asynchronous notification path; neither touches user
//! or card state.

use std::collections::HashMap;

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::cards::CardVault;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    ChargeCustomer, CreateChargeRequest, GatewayClient, HostedUrls, CORRELATION_TOKEN_KEY,
};
use crate::ledger::LedgerService;
use membrio_shared::{Product, Subscription, User};

const CURRENCY: &str = "EUR";

/// Convert a tax-inclusive euro price to integral cents.
///
/// Catalog prices are expected to already be exact to the cent; anything else
/// is an upstream rounding bug we refuse to charge for.
pub fn amount_minor_units(price: f64) -> BillingResult<i64> {
    let cents = price * 100.0;
    let rounded = cents.round();
    if (cents - rounded).abs() > 1e-6 || rounded < 0.0 {
        return Err(BillingError::AmountPrecision(price));
    }
    Ok(rounded as i64)
}

/// Fresh correlation token embedded in the charge metadata and checked back
/// against the notification. Unguessable by construction.
fn new_correlation_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Result of an accepted classic charge
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreatedCharge {
    /// Gateway charge id, stored as the payment's `reference`
    pub reference: String,
    /// Gateway-hosted payment page to redirect the member to
    pub hosted_payment_url: Option<String>,
}

/// Charge creation service
#[derive(Clone)]
pub struct ChargeService {
    pool: PgPool,
    gateway: GatewayClient,
    ledger: LedgerService,
    vault: CardVault,
}

impl ChargeService {
    pub fn new(pool: PgPool, gateway: GatewayClient) -> Self {
        let ledger = LedgerService::new(pool.clone());
        let vault = CardVault::new(pool.clone());
        Self {
            pool,
            gateway,
            ledger,
            vault,
        }
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    /// Create a classic, member-initiated charge for a catalog product and
    /// return the hosted payment page to redirect to.
    pub async fn create_classic_payment(
        &self,
        user: &User,
        subscription: &Subscription,
        product: &Product,
        return_url: String,
        cancel_url: String,
    ) -> BillingResult<CreatedCharge> {
        let amount = amount_minor_units(product.price)?;
        let token = new_correlation_token();
        let today = OffsetDateTime::now_utc().date();
        let subscribed_until = today + Duration::days(i64::from(product.duration_days));

        let mut metadata = HashMap::new();
        metadata.insert(CORRELATION_TOKEN_KEY.to_string(), token.clone());

        let request = CreateChargeRequest {
            amount,
            currency: CURRENCY.to_string(),
            customer: ChargeCustomer {
                email: Some(user.email.clone()),
                first_name: None,
                last_name: None,
            },
            save_card: product.recurrent,
            payment_method: None,
            metadata,
            hosted_payment: Some(HostedUrls {
                return_url,
                cancel_url,
                payment_url: None,
            }),
            notification_url: self.gateway.config().notification_url.clone(),
        };

        let charge = self.gateway.create_charge(&request).await?;
        let hosted_payment_url = charge.hosted_payment_url().map(str::to_string);

        self.insert_pending(user, subscription, product, &charge.id, &token, subscribed_until)
            .await?;

        tracing::info!(
            user_id = %user.id,
            reference = %charge.id,
            amount_cents = amount,
            subscribed_until = %subscribed_until,
            "Created classic charge"
        );

        Ok(CreatedCharge {
            reference: charge.id,
            hosted_payment_url,
        })
    }

    /// Attempt a merchant-initiated recurring charge for a member whose
    /// access is due for renewal.
    ///
    /// Preconditions: a usable stored card, plus a current product and
    /// subscription resolvable from the last validated payment. Missing any
    /// of these the attempt is silently skipped; the sweep's lapse pass will
    /// downgrade the member if nothing else pays.
    ///
    /// The gateway may report an immediate `is_paid`, but the row is written
    /// pending regardless: the asynchronous notification is the single
    /// transition path.
    pub async fn make_recurring_payment(&self, user: &User) -> BillingResult<Option<String>> {
        let today = OffsetDateTime::now_utc().date();

        let Some(card) = self.vault.usable_card(user.id, today).await? else {
            tracing::debug!(user_id = %user.id, "Recurring charge skipped: no usable card");
            return Ok(None);
        };
        let Some(product) = self.ledger.current_product(user.id, today).await? else {
            tracing::debug!(user_id = %user.id, "Recurring charge skipped: no current product");
            return Ok(None);
        };
        let Some(subscription) = self.ledger.current_subscription(user.id, today).await? else {
            tracing::debug!(user_id = %user.id, "Recurring charge skipped: no current subscription");
            return Ok(None);
        };

        let amount = amount_minor_units(product.price)?;
        let token = new_correlation_token();
        let subscribed_until = today + Duration::days(i64::from(product.duration_days));

        let mut metadata = HashMap::new();
        metadata.insert(CORRELATION_TOKEN_KEY.to_string(), token.clone());

        let request = CreateChargeRequest {
            amount,
            currency: CURRENCY.to_string(),
            customer: ChargeCustomer {
                email: Some(user.email.clone()),
                first_name: card.first_name.clone(),
                last_name: card.last_name.clone(),
            },
            // The card is already vaulted; a renewal never re-saves it
            save_card: false,
            payment_method: Some(card.card_id.clone()),
            metadata,
            hosted_payment: None,
            notification_url: self.gateway.config().notification_url.clone(),
        };

        let charge = self.gateway.create_charge(&request).await?;

        self.insert_pending(user, &subscription, &product, &charge.id, &token, subscribed_until)
            .await?;

        tracing::info!(
            user_id = %user.id,
            reference = %charge.id,
            amount_cents = amount,
            immediate_is_paid = charge.is_paid,
            "Created recurring charge, awaiting notification"
        );

        Ok(Some(charge.id))
    }

    async fn insert_pending(
        &self,
        user: &User,
        subscription: &Subscription,
        product: &Product,
        reference: &str,
        token: &str,
        subscribed_until: time::Date,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (user_id, subscription_id, product_id, reference, token, price, tax, subscribed_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id)
        .bind(subscription.id)
        .bind(product.id)
        .bind(reference)
        .bind(token)
        .bind(product.price)
        .bind(product.tax_rate)
        .bind(subscribed_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_accepts_integral_cent_prices() {
        assert_eq!(amount_minor_units(25.0).unwrap(), 2500);
        assert_eq!(amount_minor_units(17.99).unwrap(), 1799);
        assert_eq!(amount_minor_units(0.01).unwrap(), 1);
        assert_eq!(amount_minor_units(1200.50).unwrap(), 120050);
    }

    #[test]
    fn test_amount_rejects_sub_cent_prices() {
        assert!(matches!(
            amount_minor_units(17.999),
            Err(BillingError::AmountPrecision(_))
        ));
        assert!(matches!(
            amount_minor_units(0.005),
            Err(BillingError::AmountPrecision(_))
        ));
        assert!(amount_minor_units(-1.0).is_err());
    }

    #[test]
    fn test_correlation_tokens_are_unique() {
        let a = new_correlation_token();
        let b = new_correlation_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
