//! Common types used across Membrio

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// A member's access level on the platform.
///
/// Stored as an ordered integer on the user row. The level only ever moves
/// through the billing crate (reconciliation, sweep, unsubscribe) and the
/// email-confirmation flow; everything else reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accreditation {
    /// Registered, email not yet confirmed
    Unvalidated,
    /// Email confirmed, no active subscription
    Validated,
    /// Active paying subscriber
    Paying,
}

impl Accreditation {
    /// Integer level as persisted (0/1/2)
    pub fn level(&self) -> i32 {
        match self {
            Self::Unvalidated => 0,
            Self::Validated => 1,
            Self::Paying => 2,
        }
    }

    /// Parse a persisted level; out-of-range values clamp to the nearest tier
    pub fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=0 => Self::Unvalidated,
            1 => Self::Validated,
            _ => Self::Paying,
        }
    }

    /// Whether this level grants access to the subscription catalog and checkout
    pub fn can_subscribe(&self) -> bool {
        self.level() >= 1
    }

    pub fn is_paying(&self) -> bool {
        matches!(self, Self::Paying)
    }
}

impl Default for Accreditation {
    fn default() -> Self {
        Self::Unvalidated
    }
}

impl std::fmt::Display for Accreditation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unvalidated => write!(f, "unvalidated"),
            Self::Validated => write!(f, "validated"),
            Self::Paying => write!(f, "paying"),
        }
    }
}

/// Status of a payment ledger entry.
///
/// A payment starts pending (NULL in storage) and transitions exactly once to
/// a terminal status. Gateway failure codes are open-ended, so they are kept
/// as the raw code string rather than enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    /// Awaiting the gateway's asynchronous notification
    Pending,
    /// Confirmed paid by a token-valid notification
    Paid,
    /// Notification carried a correlation token that did not match
    FraudSuspected,
    /// Member cancelled the subscription themselves
    Unsubscribed,
    /// Gateway-reported failure, carrying the gateway's failure code
    Failed(String),
}

impl PaymentStatus {
    pub const PAID: &'static str = "paid";
    pub const FRAUD_SUSPECTED: &'static str = "fraud_suspected";
    pub const UNSUBSCRIBED: &'static str = "unsubscribed";

    /// Parse the persisted status column (NULL = pending)
    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            None | Some("") => Self::Pending,
            Some(Self::PAID) => Self::Paid,
            Some(Self::FRAUD_SUSPECTED) => Self::FraudSuspected,
            Some(Self::UNSUBSCRIBED) => Self::Unsubscribed,
            Some(code) => Self::Failed(code.to_string()),
        }
    }

    /// Value to persist (None = pending)
    pub fn as_db(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Paid => Some(Self::PAID),
            Self::FraudSuspected => Some(Self::FRAUD_SUSPECTED),
            Self::Unsubscribed => Some(Self::UNSUBSCRIBED),
            Self::Failed(code) => Some(code),
        }
    }

    /// A terminal status never transitions again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_db() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "pending"),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Member account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub accreditation: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn accreditation(&self) -> Accreditation {
        Accreditation::from_level(self.accreditation)
    }
}

/// Subscription offer (catalog reference data)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: OffsetDateTime,
}

/// Product of a subscription: a concrete price/duration combination
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub name: String,
    pub description: String,
    /// Tax-inclusive price in euros
    pub price: f64,
    pub tax_rate: f64,
    /// Whether a successful payment enrolls the member in recurring billing
    pub recurrent: bool,
    /// Days of access granted per successful payment
    pub duration_days: i32,
    pub created_at: OffsetDateTime,
}

/// Payment ledger entry: one attempt to charge a member for a product
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub product_id: Uuid,
    /// Gateway-issued charge id, unique, the lookup key for notifications
    pub reference: String,
    /// Server-generated correlation secret, checked against notifications
    #[serde(skip_serializing)]
    pub token: String,
    pub price: f64,
    pub tax: f64,
    /// NULL while pending; terminal status or gateway failure code otherwise
    pub status: Option<String>,
    pub error_message: Option<String>,
    /// Access expiry this attempt grants if it succeeds
    pub subscribed_until: Date,
    pub created_at: OffsetDateTime,
}

impl Payment {
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::from_db(self.status.as_deref())
    }
}

/// Vaulted card reference for merchant-initiated recurring charges
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Card {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Gateway-issued card token, unique
    pub card_id: String,
    pub exp_date: Date,
    pub available: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: OffsetDateTime,
}

impl Card {
    pub fn is_expired(&self, today: Date) -> bool {
        self.exp_date < today
    }

    pub fn is_usable(&self, today: Date) -> bool {
        self.available && !self.is_expired(today)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_accreditation_levels() {
        assert_eq!(Accreditation::Unvalidated.level(), 0);
        assert_eq!(Accreditation::Validated.level(), 1);
        assert_eq!(Accreditation::Paying.level(), 2);
    }

    #[test]
    fn test_accreditation_from_level() {
        assert_eq!(Accreditation::from_level(0), Accreditation::Unvalidated);
        assert_eq!(Accreditation::from_level(1), Accreditation::Validated);
        assert_eq!(Accreditation::from_level(2), Accreditation::Paying);
        // Out-of-range values clamp rather than panic
        assert_eq!(Accreditation::from_level(-1), Accreditation::Unvalidated);
        assert_eq!(Accreditation::from_level(7), Accreditation::Paying);
    }

    #[test]
    fn test_accreditation_ordering() {
        assert!(Accreditation::Unvalidated < Accreditation::Validated);
        assert!(Accreditation::Validated < Accreditation::Paying);
        assert!(!Accreditation::Unvalidated.can_subscribe());
        assert!(Accreditation::Validated.can_subscribe());
        assert!(Accreditation::Paying.can_subscribe());
        assert!(Accreditation::Paying.is_paying());
        assert!(!Accreditation::Validated.is_paying());
    }

    #[test]
    fn test_payment_status_round_trip() {
        assert_eq!(PaymentStatus::from_db(None), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::from_db(Some("")), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::from_db(Some("paid")), PaymentStatus::Paid);
        assert_eq!(
            PaymentStatus::from_db(Some("fraud_suspected")),
            PaymentStatus::FraudSuspected
        );
        assert_eq!(
            PaymentStatus::from_db(Some("unsubscribed")),
            PaymentStatus::Unsubscribed
        );
        assert_eq!(
            PaymentStatus::from_db(Some("card_declined")),
            PaymentStatus::Failed("card_declined".to_string())
        );

        assert_eq!(PaymentStatus::Pending.as_db(), None);
        assert_eq!(PaymentStatus::Paid.as_db(), Some("paid"));
        assert_eq!(
            PaymentStatus::Failed("aborted".to_string()).as_db(),
            Some("aborted")
        );
    }

    #[test]
    fn test_payment_status_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::FraudSuspected.is_terminal());
        assert!(PaymentStatus::Unsubscribed.is_terminal());
        assert!(PaymentStatus::Failed("timeout".to_string()).is_terminal());
    }

    #[test]
    fn test_payment_status_display() {
        assert_eq!(PaymentStatus::Pending.to_string(), "pending");
        assert_eq!(PaymentStatus::Paid.to_string(), "paid");
        assert_eq!(
            PaymentStatus::Failed("insufficient_funds".to_string()).to_string(),
            "insufficient_funds"
        );
    }

    #[test]
    fn test_card_usability() {
        let card = Card {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            card_id: "card_test".to_string(),
            exp_date: date!(2025 - 06 - 30),
            available: true,
            first_name: None,
            last_name: None,
            created_at: OffsetDateTime::now_utc(),
        };

        assert!(card.is_usable(date!(2025 - 06 - 30)));
        assert!(card.is_usable(date!(2025 - 01 - 01)));
        assert!(!card.is_usable(date!(2025 - 07 - 01)));

        let unavailable = Card {
            available: false,
            ..card
        };
        assert!(!unavailable.is_usable(date!(2025 - 01 - 01)));
    }
}
