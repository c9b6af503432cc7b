//! Member-initiated unsubscribe

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::{accreditation, cards};
use membrio_shared::{Accreditation, PaymentStatus};

/// What the unsubscribe actually touched
#[derive(Debug, Clone, serde::Serialize)]
pub struct UnsubscribeOutcome {
    pub payment_marked: bool,
    pub cards_invalidated: u64,
}

/// Unsubscribe a paying member: downgrade accreditation, settle the current
/// validated payment as `unsubscribed` and invalidate their stored cards.
///
/// All three mutations commit or roll back as one transaction. A missing
/// validated payment or card is skipped inside the transaction, not an
/// error; the member may have unsubscribed before and come back.
pub async fn unsubscribe(pool: &PgPool, user_id: Uuid) -> BillingResult<UnsubscribeOutcome> {
    let today = OffsetDateTime::now_utc().date();
    let mut tx = pool.begin().await?;

    let current: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM payments
        WHERE user_id = $1 AND status = $2 AND subscribed_until >= $3
        ORDER BY subscribed_until DESC, created_at DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .bind(PaymentStatus::PAID)
    .bind(today)
    .fetch_optional(&mut *tx)
    .await?;

    let payment_marked = match current {
        Some((payment_id,)) => {
            sqlx::query("UPDATE payments SET status = $1 WHERE id = $2")
                .bind(PaymentStatus::UNSUBSCRIBED)
                .bind(payment_id)
                .execute(&mut *tx)
                .await?;
            true
        }
        None => false,
    };

    let cards_invalidated = cards::invalidate_for_user(&mut *tx, user_id).await?;

    accreditation::set_level(&mut *tx, user_id, Accreditation::Validated).await?;

    tx.commit().await?;

    tracing::info!(
        user_id = %user_id,
        payment_marked = payment_marked,
        cards_invalidated = cards_invalidated,
        "Member unsubscribed"
    );

    Ok(UnsubscribeOutcome {
        payment_marked,
        cards_invalidated,
    })
}
