//! Periodic maintenance sweep
//!
//! Three set-based sub-tasks, each idempotent and safe to re-run: expire
//! stale cards, lapse paying members whose access ran out, and trigger
//! recurring renewals for members whose access expires today. Lapse matches
//! `< today` and renewal `== today`; the disjoint predicates keep the
//! sub-tasks order-insensitive.

use sqlx::PgPool;
use time::{Date, OffsetDateTime};

use crate::accreditation;
use crate::cards::CardVault;
use crate::charge::ChargeService;
use crate::error::BillingResult;
use membrio_shared::{Accreditation, PaymentStatus, User};

/// Counters from one sweep run
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SweepReport {
    pub cards_expired: u64,
    pub users_lapsed: u64,
    pub renewals_attempted: u64,
    pub renewals_skipped: u64,
    pub renewals_failed: u64,
}

/// The sweep job
pub struct SweepService {
    pool: PgPool,
    charges: ChargeService,
    vault: CardVault,
}

impl SweepService {
    pub fn new(pool: PgPool, charges: ChargeService) -> Self {
        let vault = CardVault::new(pool.clone());
        Self {
            pool,
            charges,
            vault,
        }
    }

    /// Run the full sweep for today.
    pub async fn run(&self) -> BillingResult<SweepReport> {
        self.run_for_date(OffsetDateTime::now_utc().date()).await
    }

    /// Run the full sweep for an explicit date.
    pub async fn run_for_date(&self, today: Date) -> BillingResult<SweepReport> {
        let mut report = SweepReport {
            cards_expired: self.vault.expire_stale(today).await?,
            users_lapsed: accreditation::lapse_expired(&self.pool, today).await?,
            ..SweepReport::default()
        };

        for user in self.users_due_for_renewal(today).await? {
            match self.charges.make_recurring_payment(&user).await {
                Ok(Some(reference)) => {
                    report.renewals_attempted += 1;
                    tracing::info!(
                        user_id = %user.id,
                        reference = %reference,
                        "Renewal charge initiated"
                    );
                }
                Ok(None) => {
                    report.renewals_skipped += 1;
                }
                // One member's failed renewal never aborts the sweep; the
                // lapse pass catches them on a later run if nothing pays.
                Err(e) => {
                    report.renewals_failed += 1;
                    tracing::error!(
                        user_id = %user.id,
                        error = %e,
                        "Renewal charge attempt failed"
                    );
                }
            }
        }

        tracing::info!(
            cards_expired = report.cards_expired,
            users_lapsed = report.users_lapsed,
            renewals_attempted = report.renewals_attempted,
            renewals_skipped = report.renewals_skipped,
            renewals_failed = report.renewals_failed,
            "Sweep completed"
        );

        Ok(report)
    }

    /// Paying members whose *latest* validated payment grants access exactly
    /// through today, on a recurrent product.
    async fn users_due_for_renewal(&self, today: Date) -> BillingResult<Vec<User>> {
        let users: Vec<User> = sqlx::query_as(
            r#"
            SELECT u.id, u.username, u.email, u.password_hash, u.accreditation,
                   u.created_at, u.updated_at
            FROM users u
            JOIN LATERAL (
                SELECT p.product_id, p.subscribed_until
                FROM payments p
                WHERE p.user_id = u.id AND p.status = $1 AND p.subscribed_until >= $2
                ORDER BY p.subscribed_until DESC, p.created_at DESC
                LIMIT 1
            ) latest ON TRUE
            JOIN products pr ON pr.id = latest.product_id
            WHERE u.accreditation = $3
              AND latest.subscribed_until = $2
              AND pr.recurrent
            "#,
        )
        .bind(PaymentStatus::PAID)
        .bind(today)
        .bind(Accreditation::Paying.level())
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}
