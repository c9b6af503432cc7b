//! Membrio API server entry point

use anyhow::Context;

use membrio_api::{config::Config, routes, state::AppState};
use membrio_billing::GatewayClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "membrio_api=info,membrio_billing=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let pool = membrio_shared::create_pool(&config.database_url)
        .await
        .context("connecting to database")?;
    membrio_shared::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let gateway = GatewayClient::from_env().context("configuring payment gateway")?;

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config, gateway);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {}", bind_address))?;
    tracing::info!(address = %bind_address, "Membrio API listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
