//! Notification reconciliation: the subscription/payment state machine
//!
//! Every verified gateway notification flows through here. A payment starts
//! pending and transitions exactly once to a terminal status; terminal rows
//! are never rewritten. The whole handler runs in one transaction with a row
//! lock on the payment, which is what makes concurrent and re-delivered
//! notifications safe.

use sqlx::PgPool;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};
use crate::gateway::ChargeResource;
use crate::{accreditation, cards};
use membrio_shared::{Accreditation, Payment, PaymentStatus};

/// Recorded on the payment when the correlation token does not match
const TOKEN_MISMATCH_MESSAGE: &str =
    "notification correlation token does not match the token stored for this payment";

/// What a notification payload asks us to do with a payment row.
///
/// Pure decision logic, computed from the stored row and the payload alone so
/// it can be tested without a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionPlan {
    /// Token-valid success: mark paid, maybe vault the card, elevate the user
    MarkPaid { save_card: bool },
    /// Gateway-reported failure: record the code and message
    MarkFailed { code: String, message: String },
    /// Success payload with a wrong correlation token
    MarkFraud,
    /// Terminal row, payload agrees with what is stored: re-delivery no-op
    Duplicate,
    /// Terminal row, payload disagrees: report, never overwrite
    Anomaly,
    /// Refund or other unrecognized payload kind: acknowledge, touch nothing
    Ignore { kind: String },
}

fn tokens_match(stored: &str, provided: Option<&str>) -> bool {
    match provided {
        Some(provided) => bool::from(stored.as_bytes().ct_eq(provided.as_bytes())),
        None => false,
    }
}

/// Decide the transition for a payment given a notification payload.
pub fn plan_transition(
    current: &PaymentStatus,
    stored_token: &str,
    payload: &ChargeResource,
) -> TransitionPlan {
    if payload.object != "payment" {
        return TransitionPlan::Ignore {
            kind: payload.object.clone(),
        };
    }

    if payload.is_paid {
        // The token check comes first: a forged or replayed notification must
        // be flagged regardless of what it claims about the charge.
        let incoming = if tokens_match(stored_token, payload.correlation_token()) {
            PaymentStatus::Paid
        } else {
            PaymentStatus::FraudSuspected
        };

        if current.is_terminal() {
            return if *current == incoming {
                TransitionPlan::Duplicate
            } else {
                TransitionPlan::Anomaly
            };
        }

        return match incoming {
            PaymentStatus::Paid => TransitionPlan::MarkPaid {
                save_card: payload.save_card && payload.card.is_some(),
            },
            _ => TransitionPlan::MarkFraud,
        };
    }

    if let Some(failure) = &payload.failure {
        let incoming = PaymentStatus::Failed(failure.code.clone());
        if current.is_terminal() {
            return if *current == incoming {
                TransitionPlan::Duplicate
            } else {
                TransitionPlan::Anomaly
            };
        }
        return TransitionPlan::MarkFailed {
            code: failure.code.clone(),
            message: failure.message.clone(),
        };
    }

    // A payment object that is neither paid nor failed carries no result yet
    TransitionPlan::Ignore {
        kind: "payment without result".to_string(),
    }
}

/// How a notification was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Paid { card_created: bool },
    Failed(String),
    FraudSuspected,
    Duplicate,
    Anomaly,
    Ignored,
}

/// The reconciliation engine: applies notification payloads to the ledger,
/// the card vault and user accreditation.
#[derive(Clone)]
pub struct ReconciliationEngine {
    pool: PgPool,
}

impl ReconciliationEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply one verified notification payload.
    ///
    /// Looks the payment up by gateway charge id; an unknown reference is an
    /// error, never an implicit row. The row is locked for the duration of
    /// the transaction so two concurrent deliveries for the same charge
    /// serialize: the first applies the transition, the second sees a
    /// terminal row and resolves to `Duplicate` or `Anomaly`.
    pub async fn handle_notification(
        &self,
        payload: &ChargeResource,
    ) -> BillingResult<NotificationOutcome> {
        let mut tx = self.pool.begin().await?;

        let payment: Option<Payment> = sqlx::query_as(
            r#"
            SELECT id, user_id, subscription_id, product_id, reference, token,
                   price, tax, status, error_message, subscribed_until, created_at
            FROM payments
            WHERE reference = $1
            FOR UPDATE
            "#,
        )
        .bind(&payload.id)
        .fetch_optional(&mut *tx)
        .await?;

        let payment = payment.ok_or_else(|| BillingError::UnknownPayment(payload.id.clone()))?;

        let outcome = match plan_transition(&payment.status(), &payment.token, payload) {
            TransitionPlan::Ignore { kind } => {
                tracing::warn!(
                    reference = %payment.reference,
                    kind = %kind,
                    "Unhandled notification kind, acknowledged without mutation"
                );
                NotificationOutcome::Ignored
            }
            TransitionPlan::Duplicate => {
                tracing::info!(
                    reference = %payment.reference,
                    status = %payment.status(),
                    "Re-delivered notification for settled payment, no-op"
                );
                NotificationOutcome::Duplicate
            }
            TransitionPlan::Anomaly => {
                tracing::error!(
                    reference = %payment.reference,
                    stored_status = %payment.status(),
                    payload_is_paid = payload.is_paid,
                    payload_failure = ?payload.failure,
                    "Conflicting notification for settled payment, refusing to overwrite"
                );
                NotificationOutcome::Anomaly
            }
            TransitionPlan::MarkFraud => {
                sqlx::query("UPDATE payments SET status = $1, error_message = $2 WHERE id = $3")
                    .bind(PaymentStatus::FRAUD_SUSPECTED)
                    .bind(TOKEN_MISMATCH_MESSAGE)
                    .bind(payment.id)
                    .execute(&mut *tx)
                    .await?;

                tracing::error!(
                    reference = %payment.reference,
                    user_id = %payment.user_id,
                    "Correlation token mismatch, payment flagged as fraud suspected"
                );
                NotificationOutcome::FraudSuspected
            }
            TransitionPlan::MarkFailed { code, message } => {
                sqlx::query("UPDATE payments SET status = $1, error_message = $2 WHERE id = $3")
                    .bind(&code)
                    .bind(&message)
                    .bind(payment.id)
                    .execute(&mut *tx)
                    .await?;

                tracing::info!(
                    reference = %payment.reference,
                    user_id = %payment.user_id,
                    failure_code = %code,
                    "Payment failed at the gateway"
                );
                NotificationOutcome::Failed(code)
            }
            TransitionPlan::MarkPaid { save_card } => {
                sqlx::query("UPDATE payments SET status = $1 WHERE id = $2")
                    .bind(PaymentStatus::PAID)
                    .bind(payment.id)
                    .execute(&mut *tx)
                    .await?;

                let mut card_created = false;
                if save_card {
                    if let Some(card) = &payload.card {
                        card_created = cards::insert_if_absent(
                            &mut *tx,
                            payment.user_id,
                            card,
                            payload.customer.as_ref(),
                        )
                        .await?;
                    }
                }

                // The single place in the system where accreditation increases
                // to the paying level.
                accreditation::set_level(&mut *tx, payment.user_id, Accreditation::Paying).await?;

                tracing::info!(
                    reference = %payment.reference,
                    user_id = %payment.user_id,
                    card_created = card_created,
                    subscribed_until = %payment.subscribed_until,
                    "Payment confirmed, member accredited"
                );
                NotificationOutcome::Paid { card_created }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}
