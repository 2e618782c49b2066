use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::{
    auth::AuthenticatedUser,
    models::ExchangeRate,
    services::{forex::refresh_exchange_rates, rates::list_exchange_rates},
    state::AppState,
};

#[derive(Serialize)]
pub struct RefreshResponse {
    pub message: &'static str,
    pub updated: usize,
}

pub async fn update_rates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, (StatusCode, String)> {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if !cron_authorized(state.config.cron_secret.as_deref(), provided) {
        warn!("rejected exchange rate refresh request");
        return Err((StatusCode::UNAUTHORIZED, "Unauthorized".into()));
    }

    let updated = refresh_exchange_rates(
        &state.pool,
        state.config.currency_api_key.as_deref(),
        &state.config.base_currency,
    )
    .await
    .map_err(|err| {
        error!(error = %err, "exchange rate refresh failed");
        crate::auth::internal_error(err)
    })?;
    state.rates.invalidate().await;

    Ok(Json(RefreshResponse {
        message: "Exchange rates updated",
        updated,
    }))
}

pub async fn list_rates(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<ExchangeRate>>, (StatusCode, String)> {
    let records = list_exchange_rates(&state.pool)
        .await
        .map_err(crate::auth::internal_error)?;
    Ok(Json(records))
}

/// A cron call must carry `Bearer <secret>`; with no secret configured
/// nothing is accepted.
pub fn cron_authorized(secret: Option<&str>, authorization: Option<&str>) -> bool {
    let (Some(secret), Some(authorization)) = (secret, authorization) else {
        return false;
    };
    authorization
        .strip_prefix("Bearer ")
        .is_some_and(|token| token == secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_bearer_secret() {
        assert!(cron_authorized(Some("s3cret"), Some("Bearer s3cret")));
    }

    #[test]
    fn rejects_wrong_or_malformed_credentials() {
        assert!(!cron_authorized(Some("s3cret"), Some("Bearer nope")));
        assert!(!cron_authorized(Some("s3cret"), Some("s3cret")));
        assert!(!cron_authorized(Some("s3cret"), None));
    }

    #[test]
    fn rejects_everything_without_configured_secret() {
        assert!(!cron_authorized(None, Some("Bearer ")));
        assert!(!cron_authorized(None, Some("Bearer anything")));
    }
}
