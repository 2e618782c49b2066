//! Dashboard aggregation over a snapshot of subscriptions and rates.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{BillingError, Result},
    models::Subscription,
    services::{
        billing::{BillingCycle, Normalized},
        rates::ExchangeRates,
        schedule::days_until,
    },
};

pub const RENEWAL_WINDOW_DAYS: i64 = 15;
pub const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingRenewal {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub days_until_renewal: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySpending {
    pub name: String,
    pub value: f64,
}

/// A record whose contribution was dropped or zeroed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationWarning {
    pub subscription_id: Uuid,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_monthly_cost: f64,
    pub total_yearly_cost: f64,
    pub active_subscriptions: usize,
    pub active_subscriptions_change: i64,
    pub monthly_cost_change: f64,
    pub number_of_upcoming_renewals: usize,
    pub upcoming_renewals: Vec<UpcomingRenewal>,
    pub category_spending: Vec<CategorySpending>,
    pub recent_subscriptions: Vec<Subscription>,
    pub warnings: Vec<AggregationWarning>,
}

#[derive(Debug, Clone)]
pub enum DashboardOutcome {
    /// No active subscriptions; the client shows its onboarding state.
    Empty,
    Summary(Box<DashboardSummary>),
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    monthly: f64,
    yearly: f64,
}

/// Builds the dashboard for one user.
///
/// Fails only when `rates` is missing. A record with an unusable cost or
/// cycle is reported in `warnings` and the rest of the list still counts.
pub fn aggregate(
    subscriptions: &[Subscription],
    rates: Option<&ExchangeRates>,
    now: DateTime<Utc>,
) -> Result<DashboardOutcome> {
    let rates = rates.ok_or(BillingError::RatesUnavailable)?;

    let active: Vec<&Subscription> = subscriptions.iter().filter(|sub| sub.is_active()).collect();
    if active.is_empty() {
        debug!(total = subscriptions.len(), "no active subscriptions to aggregate");
        return Ok(DashboardOutcome::Empty);
    }

    let today = now.date_naive();
    let month_start = today
        .with_day(1)
        .unwrap_or(today)
        .and_time(NaiveTime::MIN)
        .and_utc();

    let mut current = Totals::default();
    let mut prior = Totals::default();
    let mut prior_count = 0usize;
    let mut categories: Vec<CategorySpending> = Vec::new();
    let mut category_index: HashMap<String, usize> = HashMap::new();
    let mut warnings = Vec::new();

    for sub in &active {
        let in_prior_cohort = sub.created_at < month_start;
        if in_prior_cohort {
            prior_count += 1;
        }

        let (monthly, yearly) = match normalized_costs(sub, rates) {
            Ok(costs) => costs,
            Err(error) => {
                warn!(subscription_id = %sub.id, %error, "subscription skipped in totals");
                warnings.push(warning_for(sub, &error));
                continue;
            }
        };
        if let Some(error) = monthly.warning() {
            warnings.push(warning_for(sub, &error));
        }

        current.monthly += monthly.value();
        current.yearly += yearly.value();
        if in_prior_cohort {
            prior.monthly += monthly.value();
            prior.yearly += yearly.value();
        }

        if let Some(category) = sub
            .category
            .as_deref()
            .map(str::trim)
            .filter(|category| !category.is_empty())
        {
            match category_index.get(category) {
                Some(&index) => categories[index].value += yearly.value(),
                None => {
                    category_index.insert(category.to_string(), categories.len());
                    categories.push(CategorySpending {
                        name: category.to_string(),
                        value: yearly.value(),
                    });
                }
            }
        }
    }

    let upcoming_renewals = upcoming_renewals(&active, now);
    let active_count = active.len();

    Ok(DashboardOutcome::Summary(Box::new(DashboardSummary {
        total_monthly_cost: current.monthly,
        total_yearly_cost: current.yearly,
        active_subscriptions: active_count,
        active_subscriptions_change: active_count as i64 - prior_count as i64,
        monthly_cost_change: current.monthly - prior.monthly,
        number_of_upcoming_renewals: upcoming_renewals.len(),
        upcoming_renewals,
        category_spending: categories,
        recent_subscriptions: recent_subscriptions(subscriptions),
        warnings,
    })))
}

/// Monthly and yearly figures for one record, converted to the base currency.
fn normalized_costs(sub: &Subscription, rates: &ExchangeRates) -> Result<(Normalized, Normalized)> {
    let cycle = BillingCycle::parse(&sub.billing_cycle);
    let converted = sub.cost * rates.multiplier(&sub.currency);
    Ok((cycle.monthly_cost(converted)?, cycle.yearly_cost(converted)?))
}

/// Active records renewing within `[now, now + 15 days]`, soonest first.
fn upcoming_renewals(active: &[&Subscription], now: DateTime<Utc>) -> Vec<UpcomingRenewal> {
    let window_end = now + Duration::days(RENEWAL_WINDOW_DAYS);
    let today = now.date_naive();

    let mut renewals: Vec<UpcomingRenewal> = active
        .iter()
        .filter_map(|sub| {
            let next = sub.next_billing_date?;
            let renews_at = next.and_time(NaiveTime::MIN).and_utc();
            (renews_at >= now && renews_at <= window_end).then(|| UpcomingRenewal {
                subscription: (*sub).clone(),
                days_until_renewal: days_until(next, today),
            })
        })
        .collect();
    renewals.sort_by_key(|renewal| renewal.subscription.next_billing_date);
    renewals
}

fn recent_subscriptions(subscriptions: &[Subscription]) -> Vec<Subscription> {
    let mut recent: Vec<&Subscription> = subscriptions.iter().collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.into_iter().take(RECENT_LIMIT).cloned().collect()
}

fn warning_for(sub: &Subscription, error: &BillingError) -> AggregationWarning {
    AggregationWarning {
        subscription_id: sub.id,
        name: sub.name.clone(),
        reason: error.to_string(),
    }
}
