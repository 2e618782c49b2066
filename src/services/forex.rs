use reqwest::{header, Client, Url};
use serde::Deserialize;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind};
use tracing::{debug, info, warn};

const LATEST_RATES_URL: &str = "https://api.freecurrencyapi.com/v1/latest";

#[derive(Deserialize)]
struct LatestRatesResponse {
    data: Option<HashMap<String, f64>>,
    message: Option<String>,
}

/// Fetches quotes for `base_currency` and stores their inverses, so each
/// stored rate converts one unit of that currency into the base currency.
///
/// Returns the number of rates written. Without an API key nothing is
/// fetched and `Ok(0)` is returned.
pub async fn refresh_exchange_rates(
    pool: &PgPool,
    api_key: Option<&str>,
    base_currency: &str,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let Some(api_key) = api_key else {
        warn!("FREECURRENCYAPI_KEY not set; skipping exchange rate refresh");
        return Ok(0);
    };

    info!(base_currency, "refreshing exchange rates");
    let client = Client::new();
    let url = Url::parse_with_params(
        LATEST_RATES_URL,
        &[("apikey", api_key), ("base_currency", base_currency)],
    )?;
    let response = client
        .get(url)
        .header(header::USER_AGENT, "subtrack-api")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Box::new(IoError::new(
            ErrorKind::Other,
            format!("exchange rate request failed: {}", response.status()),
        )));
    }
    let body = response.text().await?;
    let quotes = parse_latest_rates(&body)?;
    let multipliers = invert_quotes(&quotes);

    let mut tx = pool.begin().await?;
    for (currency_code, rate) in &multipliers {
        sqlx::query(
            r#"
            INSERT INTO exchange_rates (currency_code, rate, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (currency_code)
            DO UPDATE SET rate = EXCLUDED.rate, updated_at = NOW()
            "#,
        )
        .bind(currency_code)
        .bind(rate)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!(updated = multipliers.len(), "exchange rates updated");
    Ok(multipliers.len())
}

fn parse_latest_rates(body: &str) -> Result<HashMap<String, f64>, IoError> {
    let payload: LatestRatesResponse = serde_json::from_str(body).map_err(|err| {
        IoError::new(
            ErrorKind::Other,
            format!("failed to decode exchange rate response: {err}. body: {body}"),
        )
    })?;
    payload.data.ok_or_else(|| {
        let message = payload
            .message
            .unwrap_or_else(|| "exchange rate response missing data".to_string());
        IoError::new(ErrorKind::Other, message)
    })
}

/// Turns "units of X per base unit" quotes into "base units per X".
fn invert_quotes(quotes: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut multipliers: Vec<(String, f64)> = quotes
        .iter()
        .filter_map(|(code, quote)| {
            if quote.is_finite() && *quote > 0.0 {
                Some((code.trim().to_uppercase(), 1.0 / quote))
            } else {
                debug!(currency = %code, quote, "skipping unusable quote");
                None
            }
        })
        .collect();
    multipliers.sort_by(|a, b| a.0.cmp(&b.0));
    multipliers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_block() {
        let quotes = parse_latest_rates(r#"{"data":{"USD":0.012,"INR":1}}"#).unwrap();
        assert_eq!(quotes.get("USD"), Some(&0.012));
        assert_eq!(quotes.get("INR"), Some(&1.0));
    }

    #[test]
    fn surfaces_provider_message_when_data_missing() {
        let err = parse_latest_rates(r#"{"message":"Invalid authentication credentials"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid authentication credentials");
    }

    #[test]
    fn rejects_malformed_body() {
        let err = parse_latest_rates("<html>").unwrap_err();
        assert!(err.to_string().contains("failed to decode"));
    }

    #[test]
    fn inverts_and_skips_unusable_quotes() {
        let quotes = HashMap::from([
            ("usd".to_string(), 0.25),
            ("INR".to_string(), 1.0),
            ("XXX".to_string(), 0.0),
            ("YYY".to_string(), -2.0),
        ]);
        let multipliers = invert_quotes(&quotes);
        assert_eq!(
            multipliers,
            vec![("INR".to_string(), 1.0), ("USD".to_string(), 4.0)]
        );
    }
}
