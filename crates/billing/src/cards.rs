//! Card vault
//!
//! Stored, tokenized card references used only for merchant-initiated
//! recurring charges. Storage is get-or-create by the gateway's card id so
//! re-delivered notifications never produce duplicates.

use sqlx::{PgConnection, PgPool};
use time::{Date, Month};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{ChargeCard, ChargeCustomer};
use membrio_shared::Card;

/// A card is valid through the last day of its expiry month.
pub fn card_expiry_date(exp_year: i32, exp_month: u8) -> BillingResult<Date> {
    let month = Month::try_from(exp_month)
        .map_err(|_| BillingError::InvalidPayload(format!("card exp_month {}", exp_month)))?;
    let day = time::util::days_in_year_month(exp_year, month);
    Date::from_calendar_date(exp_year, month, day)
        .map_err(|e| BillingError::InvalidPayload(format!("card expiry date: {}", e)))
}

/// Atomic insert-if-absent keyed by the gateway's card id.
///
/// Runs on the caller's transaction so the card lands together with the
/// payment transition it belongs to. Returns true when a row was created.
pub(crate) async fn insert_if_absent(
    conn: &mut PgConnection,
    user_id: Uuid,
    card: &ChargeCard,
    customer: Option<&ChargeCustomer>,
) -> BillingResult<bool> {
    let exp_date = card_expiry_date(card.exp_year, card.exp_month)?;
    let first_name = customer.and_then(|c| c.first_name.as_deref());
    let last_name = customer.and_then(|c| c.last_name.as_deref());

    let result = sqlx::query(
        r#"
        INSERT INTO cards (user_id, card_id, exp_date, available, first_name, last_name)
        VALUES ($1, $2, $3, TRUE, $4, $5)
        ON CONFLICT (card_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(&card.id)
    .bind(exp_date)
    .bind(first_name)
    .bind(last_name)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark all of a member's available cards unavailable.
pub(crate) async fn invalidate_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> BillingResult<u64> {
    let result = sqlx::query("UPDATE cards SET available = FALSE WHERE user_id = $1 AND available")
        .bind(user_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Card vault service
#[derive(Clone)]
pub struct CardVault {
    pool: PgPool,
}

impl CardVault {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The member's card usable for a recurring charge: available and not
    /// expired as of `today`. Newest first when several qualify.
    pub async fn usable_card(&self, user_id: Uuid, today: Date) -> BillingResult<Option<Card>> {
        let card: Option<Card> = sqlx::query_as(
            r#"
            SELECT id, user_id, card_id, exp_date, available, first_name, last_name, created_at
            FROM cards
            WHERE user_id = $1 AND available AND exp_date >= $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;

        Ok(card)
    }

    /// Expire stale cards in bulk. The WHERE clause is scoped to
    /// `available AND exp_date < today` so a concurrent notification storing
    /// a fresh card is never clobbered.
    pub async fn expire_stale(&self, today: Date) -> BillingResult<u64> {
        let result =
            sqlx::query("UPDATE cards SET available = FALSE WHERE available AND exp_date < $1")
                .bind(today)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_card_expiry_is_last_day_of_month() {
        assert_eq!(card_expiry_date(2018, 12).unwrap(), date!(2018 - 12 - 31));
        assert_eq!(card_expiry_date(2025, 4).unwrap(), date!(2025 - 04 - 30));
        assert_eq!(card_expiry_date(2025, 2).unwrap(), date!(2025 - 02 - 28));
        // Leap year February
        assert_eq!(card_expiry_date(2024, 2).unwrap(), date!(2024 - 02 - 29));
    }

    #[test]
    fn test_card_expiry_rejects_bad_month() {
        assert!(card_expiry_date(2025, 0).is_err());
        assert!(card_expiry_date(2025, 13).is_err());
    }
}
