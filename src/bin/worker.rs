use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subtrack_api::{
    auth::ensure_database,
    config::AppConfig,
    migrations::run_with_repair,
    services::{forex::refresh_exchange_rates, renewals::advance_due_subscriptions},
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().expect("invalid configuration");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    ensure_database(&pool)
        .await
        .expect("database not reachable");
    run_with_repair(&pool)
        .await
        .expect("failed to run migrations");

    let mut rate_interval = tokio::time::interval(config.rate_refresh_interval);
    let mut renewal_interval = tokio::time::interval(config.renewal_sweep_interval);

    loop {
        tokio::select! {
            _ = rate_interval.tick() => {
                if let Err(error) = refresh_exchange_rates(
                    &pool,
                    config.currency_api_key.as_deref(),
                    &config.base_currency,
                )
                .await
                {
                    tracing::error!(%error, "failed to refresh exchange rates");
                }
            }
            _ = renewal_interval.tick() => {
                let today = chrono::Utc::now().date_naive();
                if let Err(error) = advance_due_subscriptions(&pool, today).await {
                    tracing::error!(?error, "failed to advance renewals");
                }
            }
        }
    }
}
