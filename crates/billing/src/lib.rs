//! Membrio billing core
//!
//! Everything that derives member access from money: charge-attempt creation,
//! the notification reconciliation state machine, the card vault, the payment
//! ledger and the daily maintenance sweep. This crate holds the only write
//! path to `users.accreditation`.

pub mod accreditation;
pub mod cards;
pub mod charge;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod reconcile;
pub mod sweep;
pub mod unsubscribe;

pub use cards::CardVault;
pub use charge::{amount_minor_units, ChargeService, CreatedCharge};
pub use error::{BillingError, BillingResult};
pub use gateway::{ChargeResource, GatewayClient, GatewayConfig, SIGNATURE_HEADER};
pub use ledger::LedgerService;
pub use reconcile::{NotificationOutcome, ReconciliationEngine};
pub use sweep::{SweepReport, SweepService};
pub use unsubscribe::{unsubscribe, UnsubscribeOutcome};
