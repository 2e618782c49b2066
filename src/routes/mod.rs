pub mod dashboard;
pub mod rates;
pub mod subscriptions;
