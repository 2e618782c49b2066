use std::sync::Arc;

use sqlx::PgPool;

use crate::{config::AppConfig, mail::Mailer, services::rates::RateCache};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub jwt_secret: String,
    pub config: Arc<AppConfig>,
    pub rates: Arc<RateCache>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            pool,
            jwt_secret: config.jwt_secret.clone(),
            rates: Arc::new(RateCache::new(config.rate_cache_ttl)),
            config: Arc::new(config),
            mailer,
        }
    }
}
