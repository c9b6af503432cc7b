//! Daily maintenance sweep entry point
//!
//! Run-once binary intended for a fixed daily schedule (cron). Expires stale
//! cards, lapses members whose access ran out, and triggers recurring
//! renewals for members expiring today. Exits non-zero on unrecoverable
//! storage error so the scheduler can alert.

use anyhow::Context;

use membrio_billing::{ChargeService, GatewayClient, SweepService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "run_sweep=info,membrio_billing=info".into()),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let pool = membrio_shared::create_pool(&database_url)
        .await
        .context("connecting to database")?;

    let gateway = GatewayClient::from_env().context("configuring payment gateway")?;
    let charges = ChargeService::new(pool.clone(), gateway);
    let sweep = SweepService::new(pool, charges);

    let report = sweep.run().await.context("sweep failed")?;

    tracing::info!(
        cards_expired = report.cards_expired,
        users_lapsed = report.users_lapsed,
        renewals_attempted = report.renewals_attempted,
        renewals_skipped = report.renewals_skipped,
        renewals_failed = report.renewals_failed,
        "Sweep run complete"
    );

    Ok(())
}
