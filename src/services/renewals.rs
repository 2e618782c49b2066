use chrono::{Datelike, NaiveDate};
use sqlx::{postgres::PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::BillingError,
    services::{
        billing::BillingCycle,
        schedule::{add_months_clamped, resolve_next_billing, NextBilling},
    },
};

/// First renewal on or after `today` for a subscription billed from `anchor`.
///
/// Every candidate is `anchor + k periods` for some `k >= 1`, so a month-end
/// anchor keeps its day: Jan 31 renews on Feb 29, Mar 31, Apr 30.
pub fn roll_forward(anchor: NaiveDate, cycle: &BillingCycle, today: NaiveDate) -> NextBilling {
    let months = match resolve_next_billing(anchor, cycle) {
        NextBilling::On(first) if first >= today => return NextBilling::On(first),
        NextBilling::On(_) => cycle.months().unwrap_or(1),
        other => return other,
    };

    let elapsed = (today.year() - anchor.year()) * 12 + today.month0() as i32
        - anchor.month0() as i32;
    let mut periods = (u32::try_from(elapsed).unwrap_or(0) / months).max(1);
    loop {
        let candidate = periods
            .checked_mul(months)
            .and_then(|offset| add_months_clamped(anchor, offset));
        match candidate {
            Some(date) if date >= today => return NextBilling::On(date),
            Some(_) => periods += 1,
            None => {
                warn!(%anchor, %cycle, "renewal date out of calendar range");
                return NextBilling::Unresolved(BillingError::InvalidDate(anchor.to_string()));
            }
        }
    }
}

/// Moves every active subscription whose renewal date has passed to its next
/// renewal. `last_billing_date` stays as the anchor the schedule is counted
/// from.
pub async fn advance_due_subscriptions(pool: &PgPool, today: NaiveDate) -> Result<usize, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, billing_cycle, last_billing_date
        FROM subscriptions
        WHERE LOWER(status) = 'active'
          AND next_billing_date < $1
        "#,
    )
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut advanced = 0usize;
    for row in rows {
        let id: Uuid = row.try_get("id")?;
        let billing_cycle: String = row.try_get("billing_cycle")?;
        let last_billing_date: NaiveDate = row.try_get("last_billing_date")?;

        let cycle = BillingCycle::parse(&billing_cycle);
        let next_billing_date = match roll_forward(last_billing_date, &cycle, today) {
            NextBilling::On(date) => Some(date),
            NextBilling::Never => None,
            NextBilling::Unresolved(reason) => {
                warn!(subscription_id = %id, %reason, "renewal left unchanged");
                continue;
            }
        };

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET next_billing_date = $1,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(next_billing_date)
        .bind(id)
        .execute(pool)
        .await?;
        advanced += 1;
    }

    if advanced > 0 {
        info!(advanced, "advanced overdue renewals");
    }
    Ok(advanced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn first_period_when_it_is_not_yet_past() {
        let rolled = roll_forward(date(2024, 6, 5), &BillingCycle::Monthly, date(2024, 6, 10));
        assert_eq!(rolled, NextBilling::On(date(2024, 7, 5)));
    }

    #[test]
    fn month_end_anchor_survives_february() {
        let anchor = date(2024, 1, 31);
        let cycle = BillingCycle::Monthly;
        let cases = [
            (date(2024, 2, 10), date(2024, 2, 29)),
            (date(2024, 3, 2), date(2024, 3, 31)),
            (date(2024, 4, 1), date(2024, 4, 30)),
            (date(2024, 5, 1), date(2024, 5, 31)),
        ];
        for (today, expected) in cases {
            assert_eq!(roll_forward(anchor, &cycle, today), NextBilling::On(expected), "{today}");
        }
    }

    #[test]
    fn skips_every_missed_period() {
        let rolled = roll_forward(date(2024, 1, 15), &BillingCycle::Quarterly, date(2024, 11, 1));
        assert_eq!(rolled, NextBilling::On(date(2025, 1, 15)));

        let rolled = roll_forward(date(2020, 8, 31), &BillingCycle::Semiannual, date(2024, 3, 1));
        assert_eq!(rolled, NextBilling::On(date(2024, 8, 31)));
    }

    #[test]
    fn lands_exactly_on_today() {
        let rolled = roll_forward(date(2023, 6, 10), &BillingCycle::Yearly, date(2024, 6, 10));
        assert_eq!(rolled, NextBilling::On(date(2024, 6, 10)));

        let rolled = roll_forward(date(2020, 2, 29), &BillingCycle::Yearly, date(2024, 2, 29));
        assert_eq!(rolled, NextBilling::On(date(2024, 2, 29)));
    }

    #[test]
    fn long_overdue_anchor_does_not_stall() {
        let rolled = roll_forward(date(1990, 1, 31), &BillingCycle::Monthly, date(2024, 6, 15));
        assert_eq!(rolled, NextBilling::On(date(2024, 6, 30)));
    }

    #[test]
    fn one_time_clears_the_renewal() {
        let rolled = roll_forward(date(2024, 1, 1), &BillingCycle::OneTime, date(2024, 2, 1));
        assert_eq!(rolled, NextBilling::Never);
    }

    #[test]
    fn unrecognized_cycle_is_unresolved() {
        let rolled = roll_forward(date(2024, 1, 1), &BillingCycle::parse("Weekly"), date(2024, 2, 1));
        assert_eq!(
            rolled,
            NextBilling::Unresolved(BillingError::UnrecognizedCycle("Weekly".into()))
        );
    }
}
