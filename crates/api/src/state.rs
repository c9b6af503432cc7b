//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::JwtManager;
use crate::config::Config;
use crate::email::MailService;
use membrio_billing::{ChargeService, GatewayClient, LedgerService, ReconciliationEngine};

/// State shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub mail: MailService,
    pub gateway: GatewayClient,
    pub charges: ChargeService,
    pub ledger: LedgerService,
    pub engine: ReconciliationEngine,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, gateway: GatewayClient) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let mail = MailService::from_env(&config.public_url);
        let charges = ChargeService::new(pool.clone(), gateway.clone());
        let ledger = LedgerService::new(pool.clone());
        let engine = ReconciliationEngine::new(pool.clone());

        Self {
            pool,
            config: Arc::new(config),
            jwt,
            mail,
            gateway,
            charges,
            ledger,
            engine,
        }
    }
}
