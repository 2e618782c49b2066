use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use tracing::error;

use crate::{
    auth::AuthenticatedUser,
    error::BillingError,
    models::Subscription,
    services::summary::{aggregate, DashboardOutcome, DashboardSummary},
    state::AppState,
};

pub const NO_ACTIVE_SUBSCRIPTIONS: &str = "No active subscriptions found.";
pub const RATES_UNAVAILABLE: &str = "Failed to fetch exchange rates.";

#[derive(Serialize)]
#[serde(untagged)]
pub enum DashboardResponse {
    Summary(Box<DashboardSummary>),
    Empty { message: &'static str },
}

pub async fn dashboard(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<DashboardResponse>, (StatusCode, String)> {
    let subscriptions = async {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, user_id, name, cost, currency, billing_cycle, last_billing_date,
                   next_billing_date, status, category, folder, notes, created_at, updated_at
            FROM subscriptions
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user.id)
        .fetch_all(&state.pool)
        .await
    };
    let rates = async { Ok::<_, sqlx::Error>(state.rates.snapshot(&state.pool).await) };

    let (subscriptions, rates) = tokio::try_join!(subscriptions, rates)
        .map_err(crate::auth::internal_error)?;

    let outcome = aggregate(&subscriptions, rates.as_deref(), Utc::now()).map_err(|err| {
        error!(user_id = %user.id, error = %err, "dashboard aggregation failed");
        error_response(&err)
    })?;
    Ok(Json(into_response(outcome)))
}

pub fn into_response(outcome: DashboardOutcome) -> DashboardResponse {
    match outcome {
        DashboardOutcome::Empty => DashboardResponse::Empty {
            message: NO_ACTIVE_SUBSCRIPTIONS,
        },
        DashboardOutcome::Summary(summary) => DashboardResponse::Summary(summary),
    }
}

pub fn error_response(err: &BillingError) -> (StatusCode, String) {
    match err {
        BillingError::RatesUnavailable => {
            (StatusCode::INTERNAL_SERVER_ERROR, RATES_UNAVAILABLE.into())
        }
        other => crate::auth::internal_error(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_outcome_serializes_as_message() {
        let body = serde_json::to_value(into_response(DashboardOutcome::Empty)).unwrap();
        assert_eq!(body, serde_json::json!({ "message": "No active subscriptions found." }));
    }

    #[test]
    fn missing_rates_map_to_fixed_message() {
        let (status, message) = error_response(&BillingError::RatesUnavailable);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Failed to fetch exchange rates.");
    }
}
