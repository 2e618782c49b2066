use thiserror::Error;

/// Failures and degradations raised by the billing core.
///
/// `InvalidAmount` and `RatesUnavailable` abort the operation that raised
/// them. `UnrecognizedCycle` and `InvalidDate` are carried as signals next to
/// a zero or missing value so the caller can report them without aborting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BillingError {
    #[error("invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("invalid billing date: {0}")]
    InvalidDate(String),

    #[error("unrecognized billing cycle: {0}")]
    UnrecognizedCycle(String),

    #[error("exchange rates unavailable")]
    RatesUnavailable,
}

pub type Result<T> = std::result::Result<T, BillingError>;
