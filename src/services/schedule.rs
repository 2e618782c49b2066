//! Renewal date arithmetic.
//!
//! "Add N months" moves to the target year and month by linear month
//! arithmetic and keeps the day of month, clamped to the length of the
//! target month. Jan 31 + 1 month is Feb 28 (Feb 29 in leap years), never
//! Mar 3.

use chrono::{DateTime, Datelike, NaiveDate};
use tracing::warn;

use crate::error::BillingError;
use crate::services::billing::BillingCycle;

/// Result of projecting the next renewal.
#[derive(Debug, Clone, PartialEq)]
pub enum NextBilling {
    On(NaiveDate),
    /// One-time charges never renew.
    Never,
    /// The date could not be computed; carries the classified reason.
    Unresolved(BillingError),
}

impl NextBilling {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            NextBilling::On(date) => Some(*date),
            NextBilling::Never | NextBilling::Unresolved(_) => None,
        }
    }

    pub fn warning(&self) -> Option<&BillingError> {
        match self {
            NextBilling::Unresolved(error) => Some(error),
            _ => None,
        }
    }
}

/// Next billing date for a free-form cycle label. `None` for one-time,
/// unrecognized or out-of-range inputs.
pub fn next_billing_date(last_billing_date: NaiveDate, cycle: &str) -> Option<NaiveDate> {
    resolve_next_billing(last_billing_date, &BillingCycle::parse(cycle)).date()
}

pub fn resolve_next_billing(last_billing_date: NaiveDate, cycle: &BillingCycle) -> NextBilling {
    match cycle {
        BillingCycle::OneTime => NextBilling::Never,
        BillingCycle::Unrecognized(label) => {
            warn!(cycle = %label, "unknown billing cycle for next billing date calculation");
            NextBilling::Unresolved(BillingError::UnrecognizedCycle(label.clone()))
        }
        _ => {
            let months = cycle.months().unwrap_or(1);
            match add_months_clamped(last_billing_date, months) {
                Some(date) => NextBilling::On(date),
                None => {
                    warn!(%last_billing_date, "billing date out of calendar range");
                    NextBilling::Unresolved(BillingError::InvalidDate(
                        last_billing_date.to_string(),
                    ))
                }
            }
        }
    }
}

/// Same as [`resolve_next_billing`] for a date that still has to be parsed.
pub fn resolve_next_billing_str(last_billing_date: &str, cycle: &str) -> NextBilling {
    match parse_billing_date(last_billing_date) {
        Some(date) => resolve_next_billing(date, &BillingCycle::parse(cycle)),
        None => {
            warn!(input = %last_billing_date, "unparseable last billing date");
            NextBilling::Unresolved(BillingError::InvalidDate(last_billing_date.to_string()))
        }
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (its local calendar date).
pub fn parse_billing_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(input)
                .ok()
                .map(|timestamp| timestamp.date_naive())
        })
}

pub fn add_months_clamped(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    let index = date
        .year()
        .checked_mul(12)?
        .checked_add(date.month0() as i32)?
        .checked_add(i32::try_from(months).ok()?)?;
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1)?, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|last| last.day())
}

/// Whole calendar days from `today` to `target`; negative when it has passed.
pub fn days_until(target: NaiveDate, today: NaiveDate) -> i64 {
    (target - today).num_days()
}
