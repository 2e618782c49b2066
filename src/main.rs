use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subtrack_api::{
    auth,
    config::AppConfig,
    mail::LogMailer,
    migrations,
    routes::{dashboard, rates, subscriptions},
    state::AppState,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().expect("invalid configuration");
    if config.cron_secret.is_none() {
        tracing::warn!("CRON_SECRET not set; the rate refresh endpoint will reject every call");
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    auth::ensure_database(&pool)
        .await
        .expect("database not reachable");
    migrations::run_with_repair(&pool)
        .await
        .expect("failed to run migrations");

    let addr = config.bind_addr;
    let state = AppState::new(pool, config, Arc::new(LogMailer));

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/verify-email", get(auth::verify_email))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/me", get(auth::me))
        .route(
            "/api/subscriptions",
            get(subscriptions::list_subscriptions).post(subscriptions::create_subscription),
        )
        .route(
            "/api/subscriptions/{id}",
            get(subscriptions::get_subscription)
                .put(subscriptions::update_subscription)
                .delete(subscriptions::delete_subscription),
        )
        .route("/api/dashboard", get(dashboard::dashboard))
        .route("/api/exchange-rates", get(rates::list_rates))
        .route("/api/cron/update-rates", get(rates::update_rates))
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .with_state(state);

    tracing::info!("subtrack API listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr)
            .await
            .expect("failed to bind address"),
        app,
    )
    .await
    .expect("server error");
}

async fn health() -> &'static str {
    "ok"
}
