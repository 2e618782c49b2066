use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use tracing::warn;
use uuid::Uuid;

use crate::{
    audit::record_audit_event,
    auth::AuthenticatedUser,
    models::{Subscription, SubscriptionPayload, ValidSubscription},
    services::schedule::{resolve_next_billing, NextBilling},
    state::AppState,
};

pub async fn list_subscriptions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Subscription>>, (StatusCode, String)> {
    let records = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT id, user_id, name, cost, currency, billing_cycle, last_billing_date,
               next_billing_date, status, category, folder, notes, created_at, updated_at
        FROM subscriptions
        WHERE user_id = $1
        ORDER BY next_billing_date ASC NULLS LAST, created_at DESC
        "#,
    )
    .bind(user.id)
    .fetch_all(&state.pool)
    .await
    .map_err(crate::auth::internal_error)?;

    Ok(Json(records))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<Subscription>, (StatusCode, String)> {
    let record = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT id, user_id, name, cost, currency, billing_cycle, last_billing_date,
               next_billing_date, status, category, folder, notes, created_at, updated_at
        FROM subscriptions
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(subscription_id)
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await
    .map_err(crate::auth::internal_error)?;

    let Some(record) = record else {
        return Err(not_found());
    };
    Ok(Json(record))
}

pub async fn create_subscription(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SubscriptionPayload>,
) -> Result<(StatusCode, Json<Subscription>), (StatusCode, String)> {
    let valid = payload
        .validate()
        .map_err(|errors| (StatusCode::BAD_REQUEST, errors.to_string()))?;
    let next_billing_date = planned_next_billing(&valid);

    let record = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (
            id, user_id, name, cost, currency, billing_cycle, last_billing_date,
            next_billing_date, status, category, folder, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING id, user_id, name, cost, currency, billing_cycle, last_billing_date,
                  next_billing_date, status, category, folder, notes, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(&valid.name)
    .bind(valid.cost)
    .bind(&valid.currency)
    .bind(valid.billing_cycle.as_str())
    .bind(valid.last_billing_date)
    .bind(next_billing_date)
    .bind(&valid.status)
    .bind(&valid.category)
    .bind(&valid.folder)
    .bind(&valid.notes)
    .fetch_one(&state.pool)
    .await
    .map_err(crate::auth::internal_error)?;

    record_audit_event(
        &state.pool,
        Some(user.id),
        "subscription.create",
        serde_json::json!({ "subscription_id": record.id, "name": record.name }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn update_subscription(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(subscription_id): Path<Uuid>,
    Json(payload): Json<SubscriptionPayload>,
) -> Result<Json<Subscription>, (StatusCode, String)> {
    let valid = payload
        .validate()
        .map_err(|errors| (StatusCode::BAD_REQUEST, errors.to_string()))?;
    let (next_billing_date, keep_stored) = match renewal_update(&valid) {
        RenewalUpdate::Set(date) => (date, false),
        RenewalUpdate::Keep => (None, true),
    };

    let record = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET name = $1,
            cost = $2,
            currency = $3,
            billing_cycle = $4,
            last_billing_date = $5,
            next_billing_date = CASE WHEN $13 THEN next_billing_date ELSE $6 END,
            status = $7,
            category = $8,
            folder = $9,
            notes = $10,
            updated_at = NOW()
        WHERE id = $11 AND user_id = $12
        RETURNING id, user_id, name, cost, currency, billing_cycle, last_billing_date,
                  next_billing_date, status, category, folder, notes, created_at, updated_at
        "#,
    )
    .bind(&valid.name)
    .bind(valid.cost)
    .bind(&valid.currency)
    .bind(valid.billing_cycle.as_str())
    .bind(valid.last_billing_date)
    .bind(next_billing_date)
    .bind(&valid.status)
    .bind(&valid.category)
    .bind(&valid.folder)
    .bind(&valid.notes)
    .bind(subscription_id)
    .bind(user.id)
    .bind(keep_stored)
    .fetch_optional(&state.pool)
    .await
    .map_err(crate::auth::internal_error)?;

    let Some(record) = record else {
        return Err(not_found());
    };

    record_audit_event(
        &state.pool,
        Some(user.id),
        "subscription.update",
        serde_json::json!({ "subscription_id": record.id, "name": record.name }),
    )
    .await;

    Ok(Json(record))
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(subscription_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let result = sqlx::query(
        r#"
        DELETE FROM subscriptions
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(subscription_id)
    .bind(user.id)
    .execute(&state.pool)
    .await
    .map_err(crate::auth::internal_error)?;

    if result.rows_affected() == 0 {
        return Err(not_found());
    }

    record_audit_event(
        &state.pool,
        Some(user.id),
        "subscription.delete",
        serde_json::json!({ "subscription_id": subscription_id }),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Renewal date stored alongside a validated payload.
pub fn planned_next_billing(valid: &ValidSubscription) -> Option<NaiveDate> {
    resolve_next_billing(valid.last_billing_date, &valid.billing_cycle).date()
}

/// What an update writes to `next_billing_date`.
#[derive(Debug, PartialEq, Eq)]
pub enum RenewalUpdate {
    /// Overwrite the column; `None` clears it for one-time charges.
    Set(Option<NaiveDate>),
    /// The date could not be resolved, so the stored value stays.
    Keep,
}

pub fn renewal_update(valid: &ValidSubscription) -> RenewalUpdate {
    match resolve_next_billing(valid.last_billing_date, &valid.billing_cycle) {
        NextBilling::On(date) => RenewalUpdate::Set(Some(date)),
        NextBilling::Never => RenewalUpdate::Set(None),
        NextBilling::Unresolved(reason) => {
            warn!(
                name = %valid.name,
                %reason,
                "renewal date unresolved, keeping the stored value"
            );
            RenewalUpdate::Keep
        }
    }
}

fn not_found() -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, "Subscription not found".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(cycle: &str, last_billing_date: &str) -> SubscriptionPayload {
        SubscriptionPayload {
            name: "Spotify".into(),
            cost: 119.0,
            currency: "inr".into(),
            billing_cycle: cycle.into(),
            last_billing_date: last_billing_date.into(),
            status: "Active".into(),
            category: "Music".into(),
            folder: "Personal".into(),
            notes: None,
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn projects_renewal_from_last_billing_date() {
        let valid = payload("Monthly", "2024-01-31").validate().unwrap();
        assert_eq!(planned_next_billing(&valid), Some(date(2024, 2, 29)));

        let valid = payload("semi-annually", "2024-08-31").validate().unwrap();
        assert_eq!(planned_next_billing(&valid), Some(date(2025, 2, 28)));
    }

    #[test]
    fn one_time_and_unknown_cycles_have_no_projection() {
        let valid = payload("One-Time", "2024-05-01").validate().unwrap();
        assert_eq!(planned_next_billing(&valid), None);

        let valid = payload("Weekly", "2024-05-01").validate().unwrap();
        assert_eq!(planned_next_billing(&valid), None);
    }

    #[test]
    fn update_clears_one_time_but_keeps_unresolved() {
        let valid = payload("One-Time", "2024-05-01").validate().unwrap();
        assert_eq!(renewal_update(&valid), RenewalUpdate::Set(None));

        let valid = payload("Weekly", "2024-05-01").validate().unwrap();
        assert_eq!(renewal_update(&valid), RenewalUpdate::Keep);

        let valid = payload("Quarterly", "2024-11-30").validate().unwrap();
        assert_eq!(renewal_update(&valid), RenewalUpdate::Set(Some(date(2025, 2, 28))));
    }

    #[test]
    fn stored_cycle_label_is_canonical() {
        let valid = payload("annually", "2024-05-01").validate().unwrap();
        assert_eq!(valid.billing_cycle.as_str(), "Yearly");
        assert_eq!(valid.currency, "INR");
    }
}
