//! End-to-end tests for the payment state machine against a real database.
//!
//! All tests are `#[ignore]` and keyed off `DATABASE_URL`:
//!
//! ```sh
//! DATABASE_URL=postgres://... cargo test -p membrio-billing -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;

use sqlx::PgPool;
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use membrio_billing::gateway::{ChargeCard, ChargeCustomer, ChargeFailure};
use membrio_billing::{
    unsubscribe, ChargeResource, ChargeService, GatewayClient, GatewayConfig, LedgerService,
    NotificationOutcome, ReconciliationEngine, SweepService,
};
use membrio_shared::{Accreditation, PaymentStatus};

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let pool = membrio_shared::create_pool(&url).await.expect("pool");
    membrio_shared::run_migrations(&pool).await.expect("migrations");
    pool
}

fn gateway_client(base_url: String) -> GatewayClient {
    GatewayClient::new(GatewayConfig {
        secret_key: "sk_test".to_string(),
        webhook_secret: "whsec_test".to_string(),
        base_url,
        notification_url: "https://example.org/api/v1/payments/notifications".to_string(),
    })
    .expect("client")
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

async fn seed_user(pool: &PgPool, accreditation: Accreditation) -> Uuid {
    let suffix = Uuid::new_v4().simple().to_string();
    sqlx::query_scalar(
        r#"
        INSERT INTO users (username, email, password_hash, accreditation)
        VALUES ($1, $2, 'x', $3)
        RETURNING id
        "#,
    )
    .bind(format!("member-{}", suffix))
    .bind(format!("member-{}@example.org", suffix))
    .bind(accreditation.level())
    .fetch_one(pool)
    .await
    .expect("seed user")
}

async fn seed_catalog(pool: &PgPool, recurrent: bool) -> (Uuid, Uuid) {
    let suffix = Uuid::new_v4().simple().to_string();
    let subscription_id: Uuid = sqlx::query_scalar(
        "INSERT INTO subscriptions (name) VALUES ($1) RETURNING id",
    )
    .bind(format!("club-{}", suffix))
    .fetch_one(pool)
    .await
    .expect("seed subscription");

    let product_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO products (subscription_id, name, price, tax_rate, recurrent, duration_days)
        VALUES ($1, $2, 25.00, 20.0, $3, 30)
        RETURNING id
        "#,
    )
    .bind(subscription_id)
    .bind(format!("annual-{}", suffix))
    .bind(recurrent)
    .fetch_one(pool)
    .await
    .expect("seed product");

    (subscription_id, product_id)
}

async fn seed_payment(
    pool: &PgPool,
    user_id: Uuid,
    subscription_id: Uuid,
    product_id: Uuid,
    token: &str,
    status: Option<&str>,
    subscribed_until: Date,
) -> String {
    let reference = format!("pay_{}", Uuid::new_v4().simple());
    sqlx::query(
        r#"
        INSERT INTO payments
            (user_id, subscription_id, product_id, reference, token, price, tax, status, subscribed_until)
        VALUES ($1, $2, $3, $4, $5, 25.00, 20.0, $6, $7)
        "#,
    )
    .bind(user_id)
    .bind(subscription_id)
    .bind(product_id)
    .bind(&reference)
    .bind(token)
    .bind(status)
    .bind(subscribed_until)
    .execute(pool)
    .await
    .expect("seed payment");
    reference
}

async fn seed_card(pool: &PgPool, user_id: Uuid, exp_date: Date, available: bool) -> String {
    let card_id = format!("card_{}", Uuid::new_v4().simple());
    sqlx::query(
        "INSERT INTO cards (user_id, card_id, exp_date, available) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(&card_id)
    .bind(exp_date)
    .bind(available)
    .execute(pool)
    .await
    .expect("seed card");
    card_id
}

async fn accreditation_of(pool: &PgPool, user_id: Uuid) -> i32 {
    sqlx::query_scalar("SELECT accreditation FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("accreditation")
}

async fn payment_status(pool: &PgPool, reference: &str) -> (Option<String>, Option<String>) {
    sqlx::query_as("SELECT status, error_message FROM payments WHERE reference = $1")
        .bind(reference)
        .fetch_one(pool)
        .await
        .expect("payment status")
}

fn paid_payload(reference: &str, token: &str) -> ChargeResource {
    let mut metadata = HashMap::new();
    metadata.insert("correlation_token".to_string(), token.to_string());
    ChargeResource {
        id: reference.to_string(),
        object: "payment".to_string(),
        is_paid: true,
        save_card: false,
        failure: None,
        card: None,
        customer: None,
        metadata,
        hosted_payment: None,
    }
}

#[tokio::test]
#[ignore] // Requires database
async fn paid_notification_is_idempotent_and_vaults_one_card() {
    let pool = pool().await;
    let user_id = seed_user(&pool, Accreditation::Validated).await;
    let (subscription_id, product_id) = seed_catalog(&pool, true).await;
    let reference = seed_payment(
        &pool,
        user_id,
        subscription_id,
        product_id,
        "tok-idem",
        None,
        today() + Duration::days(30),
    )
    .await;

    let mut payload = paid_payload(&reference, "tok-idem");
    payload.save_card = true;
    payload.card = Some(ChargeCard {
        id: format!("card_{}", Uuid::new_v4().simple()),
        exp_month: 12,
        exp_year: 2018,
        last4: None,
    });
    payload.customer = Some(ChargeCustomer {
        email: None,
        first_name: Some("Ada".to_string()),
        last_name: Some("Lovelace".to_string()),
    });

    let engine = ReconciliationEngine::new(pool.clone());

    let first = engine.handle_notification(&payload).await.unwrap();
    assert_eq!(first, NotificationOutcome::Paid { card_created: true });

    // Identical re-delivery: same terminal state, no second card, no
    // double-elevation side effects
    let second = engine.handle_notification(&payload).await.unwrap();
    assert_eq!(second, NotificationOutcome::Duplicate);

    let (status, _) = payment_status(&pool, &reference).await;
    assert_eq!(status.as_deref(), Some(PaymentStatus::PAID));
    assert_eq!(accreditation_of(&pool, user_id).await, 2);

    let card_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cards WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(card_count, 1);

    // The stored card expires on the last day of its expiry month
    let (exp_date, available): (Date, bool) =
        sqlx::query_as("SELECT exp_date, available FROM cards WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(exp_date.to_string(), "2018-12-31");
    assert!(available);
}

#[tokio::test]
#[ignore] // Requires database
async fn token_mismatch_flags_fraud_and_never_elevates() {
    let pool = pool().await;
    let user_id = seed_user(&pool, Accreditation::Validated).await;
    let (subscription_id, product_id) = seed_catalog(&pool, false).await;
    let reference = seed_payment(
        &pool,
        user_id,
        subscription_id,
        product_id,
        "tok-real",
        None,
        today() + Duration::days(30),
    )
    .await;

    let payload = paid_payload(&reference, "tok-forged");
    let engine = ReconciliationEngine::new(pool.clone());

    let outcome = engine.handle_notification(&payload).await.unwrap();
    assert_eq!(outcome, NotificationOutcome::FraudSuspected);

    let (status, error_message) = payment_status(&pool, &reference).await;
    assert_eq!(status.as_deref(), Some(PaymentStatus::FRAUD_SUSPECTED));
    assert!(error_message.is_some());
    assert_eq!(accreditation_of(&pool, user_id).await, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn gateway_failure_records_code_and_keeps_accreditation() {
    let pool = pool().await;
    let user_id = seed_user(&pool, Accreditation::Validated).await;
    let (subscription_id, product_id) = seed_catalog(&pool, false).await;
    let reference = seed_payment(
        &pool,
        user_id,
        subscription_id,
        product_id,
        "tok-fail",
        None,
        today() + Duration::days(30),
    )
    .await;

    let mut payload = paid_payload(&reference, "tok-fail");
    payload.is_paid = false;
    payload.failure = Some(ChargeFailure {
        code: "aborted".to_string(),
        message: "You have aborted the transaction".to_string(),
    });

    let engine = ReconciliationEngine::new(pool.clone());
    let outcome = engine.handle_notification(&payload).await.unwrap();
    assert_eq!(outcome, NotificationOutcome::Failed("aborted".to_string()));

    let (status, error_message) = payment_status(&pool, &reference).await;
    assert_eq!(status.as_deref(), Some("aborted"));
    assert_eq!(
        error_message.as_deref(),
        Some("You have aborted the transaction")
    );
    assert_eq!(accreditation_of(&pool, user_id).await, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn validated_payment_resolution() {
    let pool = pool().await;
    let ledger = LedgerService::new(pool.clone());
    let user_id = seed_user(&pool, Accreditation::Validated).await;

    // No payments at all
    assert!(!ledger.has_validated_payment(user_id, today()).await.unwrap());
    assert!(ledger
        .last_validated_payment(user_id, today())
        .await
        .unwrap()
        .is_none());

    let (subscription_id, product_id) = seed_catalog(&pool, false).await;

    // One unsubscribed and one paid row: resolution picks the paid one
    seed_payment(
        &pool,
        user_id,
        subscription_id,
        product_id,
        "tok-old",
        Some(PaymentStatus::UNSUBSCRIBED),
        today() + Duration::days(60),
    )
    .await;
    let paid_reference = seed_payment(
        &pool,
        user_id,
        subscription_id,
        product_id,
        "tok-new",
        Some(PaymentStatus::PAID),
        today() + Duration::days(30),
    )
    .await;

    let current = ledger
        .last_validated_payment(user_id, today())
        .await
        .unwrap()
        .expect("validated payment");
    assert_eq!(current.reference, paid_reference);
    assert!(ledger.has_validated_payment(user_id, today()).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires database
async fn unsubscribe_applies_all_three_mutations() {
    let pool = pool().await;
    let user_id = seed_user(&pool, Accreditation::Paying).await;
    let (subscription_id, product_id) = seed_catalog(&pool, true).await;
    let reference = seed_payment(
        &pool,
        user_id,
        subscription_id,
        product_id,
        "tok-unsub",
        Some(PaymentStatus::PAID),
        today() + Duration::days(30),
    )
    .await;
    let card_id = seed_card(&pool, user_id, today() + Duration::days(365), true).await;

    let outcome = unsubscribe(&pool, user_id).await.unwrap();
    assert!(outcome.payment_marked);
    assert_eq!(outcome.cards_invalidated, 1);

    let (status, _) = payment_status(&pool, &reference).await;
    assert_eq!(status.as_deref(), Some(PaymentStatus::UNSUBSCRIBED));
    assert_eq!(accreditation_of(&pool, user_id).await, 1);

    let available: bool = sqlx::query_scalar("SELECT available FROM cards WHERE card_id = $1")
        .bind(&card_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!available);

    // A second unsubscribe finds nothing left to mark but still succeeds
    let again = unsubscribe(&pool, user_id).await.unwrap();
    assert!(!again.payment_marked);
    assert_eq!(again.cards_invalidated, 0);
}

#[tokio::test]
#[ignore] // Requires database
async fn sweep_expires_cards_and_lapses_members_idempotently() {
    let pool = pool().await;
    let user_id = seed_user(&pool, Accreditation::Paying).await;
    let (subscription_id, product_id) = seed_catalog(&pool, false).await;
    seed_payment(
        &pool,
        user_id,
        subscription_id,
        product_id,
        "tok-lapsed",
        Some(PaymentStatus::PAID),
        today() - Duration::days(1),
    )
    .await;
    let card_id = seed_card(&pool, user_id, today() - Duration::days(1), true).await;

    let charges = ChargeService::new(pool.clone(), gateway_client("http://unused".to_string()));
    let sweep = SweepService::new(pool.clone(), charges);

    let report = sweep.run_for_date(today()).await.unwrap();
    assert!(report.cards_expired >= 1);
    assert!(report.users_lapsed >= 1);

    assert_eq!(accreditation_of(&pool, user_id).await, 1);
    let available: bool = sqlx::query_scalar("SELECT available FROM cards WHERE card_id = $1")
        .bind(&card_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!available);

    // Running again reaches the same end state and touches this member no
    // further
    sweep.run_for_date(today()).await.unwrap();
    assert_eq!(accreditation_of(&pool, user_id).await, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn recurring_charge_skips_without_card() {
    let pool = pool().await;
    let user_id = seed_user(&pool, Accreditation::Paying).await;
    let (subscription_id, product_id) = seed_catalog(&pool, true).await;
    seed_payment(
        &pool,
        user_id,
        subscription_id,
        product_id,
        "tok-nocard",
        Some(PaymentStatus::PAID),
        today(),
    )
    .await;

    let user: membrio_shared::User = sqlx::query_as(
        "SELECT id, username, email, password_hash, accreditation, created_at, updated_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    // No usable card: no gateway call, no new row
    let charges = ChargeService::new(pool.clone(), gateway_client("http://unused".to_string()));
    let result = charges.make_recurring_payment(&user).await.unwrap();
    assert!(result.is_none());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn sweep_triggers_renewal_on_exact_expiry_day() {
    let pool = pool().await;
    let user_id = seed_user(&pool, Accreditation::Paying).await;
    let (subscription_id, product_id) = seed_catalog(&pool, true).await;
    seed_payment(
        &pool,
        user_id,
        subscription_id,
        product_id,
        "tok-renew",
        Some(PaymentStatus::PAID),
        today(),
    )
    .await;
    seed_card(&pool, user_id, today() + Duration::days(365), true).await;

    let mut server = mockito::Server::new_async().await;
    let renewal_reference = format!("pay_{}", Uuid::new_v4().simple());
    server
        .mock("POST", "/v1/payments")
        .with_status(201)
        .with_body(format!(
            r#"{{"id": "{}", "object": "payment", "is_paid": false}}"#,
            renewal_reference
        ))
        .create_async()
        .await;

    let charges = ChargeService::new(pool.clone(), gateway_client(server.url()));
    let sweep = SweepService::new(pool.clone(), charges);

    let report = sweep.run_for_date(today()).await.unwrap();
    assert!(report.renewals_attempted >= 1);

    // The renewal row is pending, awaiting the asynchronous notification
    let (status, _) = payment_status(&pool, &renewal_reference).await;
    assert_eq!(status, None);
}
