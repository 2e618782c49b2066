use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::services::{billing::BillingCycle, schedule::parse_billing_date};

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub cost: f64,
    pub currency: String,
    pub billing_cycle: String,
    pub last_billing_date: NaiveDate,
    pub next_billing_date: Option<NaiveDate>,
    pub status: String,
    pub category: Option<String>,
    pub folder: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("active")
    }
}

/// Body of create and update requests, as sent by the client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPayload {
    pub name: String,
    pub cost: f64,
    pub currency: String,
    pub billing_cycle: String,
    pub last_billing_date: String,
    pub status: String,
    pub category: String,
    pub folder: String,
    pub notes: Option<String>,
}

/// A payload that passed validation, with normalized fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidSubscription {
    pub name: String,
    pub cost: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub last_billing_date: NaiveDate,
    pub status: String,
    pub category: String,
    pub folder: String,
    pub notes: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
pub struct FieldErrors(Vec<(&'static str, String)>);

impl FieldErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push((field, message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> Vec<&'static str> {
        self.0.iter().map(|(field, _)| *field).collect()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl SubscriptionPayload {
    pub fn validate(self) -> Result<ValidSubscription, FieldErrors> {
        let mut errors = FieldErrors::default();

        let name = required(&mut errors, "name", &self.name, "Name is required");
        if !self.cost.is_finite() || self.cost <= 0.0 {
            errors.push("cost", "Cost must be a positive number");
        }
        let currency = required(&mut errors, "currency", &self.currency, "Currency is required");
        let cycle = required(
            &mut errors,
            "billingCycle",
            &self.billing_cycle,
            "Billing cycle is required",
        );
        let last_billing_date = parse_billing_date(&self.last_billing_date);
        if last_billing_date.is_none() {
            errors.push("lastBillingDate", "Valid last billing date is required");
        }
        let status = required(&mut errors, "status", &self.status, "Status is required");
        let category = required(&mut errors, "category", &self.category, "Category is required");
        let folder = required(&mut errors, "folder", &self.folder, "Folder is required");

        match last_billing_date {
            Some(last_billing_date) if errors.is_empty() => Ok(ValidSubscription {
                name,
                cost: self.cost,
                currency: currency.to_uppercase(),
                billing_cycle: BillingCycle::parse(&cycle),
                last_billing_date,
                status,
                category,
                folder,
                notes: self
                    .notes
                    .map(|notes| notes.trim().to_string())
                    .filter(|notes| !notes.is_empty()),
            }),
            _ => Err(errors),
        }
    }
}

fn required(errors: &mut FieldErrors, field: &'static str, value: &str, message: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        errors.push(field, message);
    }
    value.to_string()
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    pub currency_code: String,
    pub rate: f64,
    pub updated_at: DateTime<Utc>,
}
