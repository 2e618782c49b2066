//! Billing cycle labels and cost normalization.
//!
//! Subscriptions are billed on different cadences. To add them up, every cost
//! is projected onto a common monthly and yearly figure here.

use std::fmt;

use tracing::{debug, warn};

use crate::error::{BillingError, Result};

/// Cadence on which a subscription is charged.
///
/// Parsed case-insensitively from free-form user input. Labels outside the
/// known set are kept verbatim in `Unrecognized` so they can be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Semiannual,
    Yearly,
    OneTime,
    Unrecognized(String),
}

impl BillingCycle {
    pub fn parse(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "monthly" => BillingCycle::Monthly,
            "quarterly" => BillingCycle::Quarterly,
            "semiannual" | "semiannually" | "semi-annual" | "semi-annually" | "biannual"
            | "biannually" | "bi-annual" | "bi-annually" => BillingCycle::Semiannual,
            "yearly" | "annually" | "annual" => BillingCycle::Yearly,
            "onetime" | "one-time" | "one time" | "one_time" => BillingCycle::OneTime,
            _ => BillingCycle::Unrecognized(label.trim().to_string()),
        }
    }

    /// Canonical label used when a cycle is persisted.
    pub fn as_str(&self) -> &str {
        match self {
            BillingCycle::Monthly => "Monthly",
            BillingCycle::Quarterly => "Quarterly",
            BillingCycle::Semiannual => "Semiannual",
            BillingCycle::Yearly => "Yearly",
            BillingCycle::OneTime => "One-Time",
            BillingCycle::Unrecognized(label) => label,
        }
    }

    /// Length of one period in calendar months, `None` for one-time and
    /// unrecognized cycles.
    pub const fn months(&self) -> Option<u32> {
        match self {
            BillingCycle::Monthly => Some(1),
            BillingCycle::Quarterly => Some(3),
            BillingCycle::Semiannual => Some(6),
            BillingCycle::Yearly => Some(12),
            BillingCycle::OneTime | BillingCycle::Unrecognized(_) => None,
        }
    }

    pub const fn is_recognized(&self) -> bool {
        !matches!(self, BillingCycle::Unrecognized(_))
    }

    pub fn monthly_cost(&self, amount: f64) -> Result<Normalized> {
        normalize(amount, self, Horizon::Month)
    }

    pub fn yearly_cost(&self, amount: f64) -> Result<Normalized> {
        normalize(amount, self, Horizon::Year)
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of projecting one cost onto a month or a year.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Cost(f64),
    /// One-time charges do not recur and contribute nothing.
    NonRecurring,
    /// The label was not understood; the cost is counted as zero.
    Unrecognized(String),
}

impl Normalized {
    pub fn value(&self) -> f64 {
        match self {
            Normalized::Cost(value) => *value,
            Normalized::NonRecurring | Normalized::Unrecognized(_) => 0.0,
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Normalized::Unrecognized(_))
    }

    /// The degradation signal, if any, as a classified error.
    pub fn warning(&self) -> Option<BillingError> {
        match self {
            Normalized::Unrecognized(label) => Some(BillingError::UnrecognizedCycle(label.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Horizon {
    Month,
    Year,
}

impl Horizon {
    const fn name(self) -> &'static str {
        match self {
            Horizon::Month => "monthly",
            Horizon::Year => "yearly",
        }
    }
}

/// Cost of one billing period projected onto a single month.
pub fn normalized_monthly_cost(amount: f64, cycle: &str) -> Result<Normalized> {
    BillingCycle::parse(cycle).monthly_cost(amount)
}

/// Cost of one billing period projected onto a full year.
pub fn normalized_yearly_cost(amount: f64, cycle: &str) -> Result<Normalized> {
    BillingCycle::parse(cycle).yearly_cost(amount)
}

pub fn validate_amount(amount: f64) -> Result<f64> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(BillingError::InvalidAmount(amount));
    }
    Ok(amount)
}

fn normalize(amount: f64, cycle: &BillingCycle, horizon: Horizon) -> Result<Normalized> {
    let amount = validate_amount(amount)?;
    match (cycle.months(), cycle) {
        (Some(months), _) => {
            let value = match horizon {
                Horizon::Month => amount / f64::from(months),
                // 12 is a multiple of every supported period length.
                Horizon::Year => amount * f64::from(12 / months),
            };
            Ok(Normalized::Cost(value))
        }
        (None, BillingCycle::Unrecognized(label)) => {
            warn!(
                cycle = %label,
                horizon = horizon.name(),
                "unknown billing cycle; cost counted as zero"
            );
            Ok(Normalized::Unrecognized(label.clone()))
        }
        (None, _) => {
            debug!(horizon = horizon.name(), "one-time charge excluded from normalization");
            Ok(Normalized::NonRecurring)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECURRING: [&str; 6] = ["Monthly", "Quarterly", "Semiannual", "Bi-annually", "Yearly", "Annually"];

    fn approx(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-9
    }

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!(BillingCycle::parse("MONTHLY"), BillingCycle::Monthly);
        assert_eq!(BillingCycle::parse(" quarterly "), BillingCycle::Quarterly);
        assert_eq!(BillingCycle::parse("Annually"), BillingCycle::Yearly);
        assert_eq!(BillingCycle::parse("bi-annually"), BillingCycle::Semiannual);
        assert_eq!(BillingCycle::parse("Semi-Annually"), BillingCycle::Semiannual);
        assert_eq!(BillingCycle::parse("One-Time"), BillingCycle::OneTime);
        assert_eq!(
            BillingCycle::parse("Weekly"),
            BillingCycle::Unrecognized("Weekly".into())
        );
    }

    #[test]
    fn canonical_labels_parse_back() {
        for cycle in [
            BillingCycle::Monthly,
            BillingCycle::Quarterly,
            BillingCycle::Semiannual,
            BillingCycle::Yearly,
            BillingCycle::OneTime,
        ] {
            assert_eq!(BillingCycle::parse(cycle.as_str()), cycle);
        }
    }

    #[test]
    fn monthly_cycle_is_identity_per_month() {
        for amount in [0.0, 0.01, 9.99, 12.0, 1_500.25] {
            assert_eq!(normalized_monthly_cost(amount, "Monthly").unwrap(), Normalized::Cost(amount));
            assert_eq!(
                normalized_yearly_cost(amount, "Monthly").unwrap(),
                Normalized::Cost(amount * 12.0)
            );
        }
    }

    #[test]
    fn factors_follow_cycle_length() {
        assert_eq!(normalized_monthly_cost(120.0, "Yearly").unwrap().value(), 10.0);
        assert_eq!(normalized_yearly_cost(120.0, "Yearly").unwrap().value(), 120.0);
        assert_eq!(normalized_monthly_cost(30.0, "Quarterly").unwrap().value(), 10.0);
        assert_eq!(normalized_yearly_cost(30.0, "Quarterly").unwrap().value(), 120.0);
        assert_eq!(normalized_monthly_cost(60.0, "Semiannual").unwrap().value(), 10.0);
        assert_eq!(normalized_yearly_cost(60.0, "Semiannual").unwrap().value(), 120.0);
    }

    #[test]
    fn yearly_is_twelve_months_for_every_recurring_cycle() {
        for cycle in RECURRING {
            for amount in [1.0, 10.0, 33.33, 99.99, 250.0] {
                let monthly = normalized_monthly_cost(amount, cycle).unwrap().value();
                let yearly = normalized_yearly_cost(amount, cycle).unwrap().value();
                assert!(approx(yearly, monthly * 12.0), "{cycle} {amount}");
            }
        }
    }

    #[test]
    fn division_keeps_full_precision() {
        let monthly = normalized_monthly_cost(10.0, "Quarterly").unwrap().value();
        assert_eq!(monthly, 10.0 / 3.0);
        assert_ne!(monthly, 3.33);
    }

    #[test]
    fn unrecognized_cycle_degrades_with_signal() {
        let monthly = normalized_monthly_cost(50.0, "Weekly").unwrap();
        let yearly = normalized_yearly_cost(50.0, "weekly").unwrap();
        assert!(monthly.is_unrecognized());
        assert!(yearly.is_unrecognized());
        assert_eq!(monthly.value(), 0.0);
        assert_eq!(
            monthly.warning(),
            Some(BillingError::UnrecognizedCycle("Weekly".into()))
        );
    }

    #[test]
    fn one_time_contributes_nothing_without_warning() {
        let monthly = normalized_monthly_cost(80.0, "One-Time").unwrap();
        assert_eq!(monthly, Normalized::NonRecurring);
        assert_eq!(monthly.value(), 0.0);
        assert!(monthly.warning().is_none());
    }

    #[test]
    fn rejects_negative_and_non_finite_amounts() {
        for amount in [-0.01, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                normalized_monthly_cost(amount, "Monthly"),
                Err(BillingError::InvalidAmount(_))
            ));
            assert!(matches!(
                normalized_yearly_cost(amount, "Monthly"),
                Err(BillingError::InvalidAmount(_))
            ));
        }
    }

    #[test]
    fn amount_is_validated_before_cycle() {
        assert!(matches!(
            normalized_yearly_cost(-5.0, "Weekly"),
            Err(BillingError::InvalidAmount(_))
        ));
    }

    #[test]
    fn repeated_calls_agree() {
        let first = normalized_yearly_cost(42.5, "Quarterly").unwrap();
        let second = normalized_yearly_cost(42.5, "Quarterly").unwrap();
        assert_eq!(first, second);
    }
}
