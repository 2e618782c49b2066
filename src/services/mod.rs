pub mod billing;
pub mod forex;
pub mod rates;
pub mod renewals;
pub mod schedule;
pub mod summary;
pub mod tokens;
