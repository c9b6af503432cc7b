//! The authoritative write path to `users.accreditation`
//!
//! Accreditation is derived state: it only moves here (reconciliation, sweep,
//! unsubscribe) and through `mark_email_validated` for the 0 -> 1 step of the
//! registration-confirmation flow. Everything else reads.

use sqlx::{PgConnection, PgPool};
use time::Date;
use uuid::Uuid;

use crate::error::BillingResult;
use membrio_shared::{Accreditation, PaymentStatus};

/// Set a member's accreditation level on the caller's transaction.
pub(crate) async fn set_level(
    conn: &mut PgConnection,
    user_id: Uuid,
    level: Accreditation,
) -> BillingResult<()> {
    sqlx::query("UPDATE users SET accreditation = $1, updated_at = NOW() WHERE id = $2")
        .bind(level.level())
        .bind(user_id)
        .execute(conn)
        .await?;

    Ok(())
}

/// Raise a freshly registered member to Validated once their email is
/// confirmed. Guarded to the 0 -> 1 step: a paying member re-running a
/// confirmation link keeps their level.
pub async fn mark_email_validated(pool: &PgPool, user_id: Uuid) -> BillingResult<bool> {
    let result = sqlx::query(
        "UPDATE users SET accreditation = $1, updated_at = NOW() WHERE id = $2 AND accreditation = $3",
    )
    .bind(Accreditation::Validated.level())
    .bind(user_id)
    .bind(Accreditation::Unvalidated.level())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Downgrade paying members whose latest validated payment has lapsed.
///
/// Members with no validated payment at all are not matched; they keep
/// whatever level the confirmation flow gave them.
pub(crate) async fn lapse_expired(pool: &PgPool, today: Date) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE users SET accreditation = $1, updated_at = NOW()
        WHERE accreditation = $2
          AND id IN (
              SELECT user_id FROM payments
              WHERE status = $3
              GROUP BY user_id
              HAVING MAX(subscribed_until) < $4
          )
        "#,
    )
    .bind(Accreditation::Validated.level())
    .bind(Accreditation::Paying.level())
    .bind(PaymentStatus::PAID)
    .bind(today)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
