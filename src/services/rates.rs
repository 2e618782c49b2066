use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::{postgres::PgPool, Row};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::models::ExchangeRate;

/// Multipliers converting an amount in a currency into the base currency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeRates {
    rates: HashMap<String, f64>,
}

impl ExchangeRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, currency_code: &str, rate: f64) {
        self.rates.insert(normalize_code(currency_code), rate);
    }

    pub fn get(&self, currency_code: &str) -> Option<f64> {
        self.rates.get(&normalize_code(currency_code)).copied()
    }

    /// Rate for `currency_code`, or 1 when the table has no entry for it.
    pub fn multiplier(&self, currency_code: &str) -> f64 {
        self.get(currency_code).unwrap_or(1.0)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl<K: AsRef<str>> FromIterator<(K, f64)> for ExchangeRates {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut rates = ExchangeRates::new();
        for (code, rate) in iter {
            rates.insert(code.as_ref(), rate);
        }
        rates
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

struct CachedRates {
    loaded_at: Instant,
    rates: Arc<ExchangeRates>,
}

/// Rate table cache shared through application state.
///
/// A snapshot is served until `ttl` has elapsed since it was loaded. Failed
/// loads are not cached.
pub struct RateCache {
    ttl: Duration,
    slot: RwLock<Option<CachedRates>>,
}

impl RateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current table from the database, `None` when it cannot be read.
    pub async fn snapshot(&self, pool: &PgPool) -> Option<Arc<ExchangeRates>> {
        self.get_or_load(|| load_exchange_rates(pool)).await
    }

    pub async fn get_or_load<F, Fut, E>(&self, load: F) -> Option<Arc<ExchangeRates>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ExchangeRates, E>>,
        E: Display,
    {
        if let Some(cached) = self.slot.read().await.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Some(Arc::clone(&cached.rates));
            }
        }

        let mut slot = self.slot.write().await;
        if let Some(cached) = slot.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Some(Arc::clone(&cached.rates));
            }
        }

        debug!("loading exchange rates");
        match load().await {
            Ok(rates) => {
                let rates = Arc::new(rates);
                *slot = Some(CachedRates {
                    loaded_at: Instant::now(),
                    rates: Arc::clone(&rates),
                });
                Some(rates)
            }
            Err(err) => {
                error!(error = %err, "failed to load exchange rates");
                None
            }
        }
    }

    pub async fn invalidate(&self) {
        self.slot.write().await.take();
    }
}

pub async fn load_exchange_rates(pool: &PgPool) -> Result<ExchangeRates, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT currency_code, rate
        FROM exchange_rates
        "#,
    )
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        warn!("no exchange rates stored; run the rate refresh");
    }

    let mut rates = ExchangeRates::new();
    for row in rows {
        let currency_code: String = row.try_get("currency_code")?;
        let rate: f64 = row.try_get("rate")?;
        rates.insert(&currency_code, rate);
    }
    Ok(rates)
}

pub async fn list_exchange_rates(pool: &PgPool) -> Result<Vec<ExchangeRate>, sqlx::Error> {
    sqlx::query_as::<_, ExchangeRate>(
        r#"
        SELECT currency_code, rate, updated_at
        FROM exchange_rates
        ORDER BY currency_code
        "#,
    )
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lookups_ignore_case_and_whitespace() {
        let rates = ExchangeRates::from_iter([("usd", 83.2), (" EUR ", 90.1)]);
        assert_eq!(rates.get("USD"), Some(83.2));
        assert_eq!(rates.get("eur"), Some(90.1));
        assert_eq!(rates.len(), 2);
    }

    #[test]
    fn missing_currency_falls_back_to_one() {
        let rates = ExchangeRates::from_iter([("USD", 83.2)]);
        assert_eq!(rates.multiplier("JPY"), 1.0);
        assert_eq!(ExchangeRates::new().multiplier("USD"), 1.0);
    }

    #[tokio::test]
    async fn serves_cached_snapshot_within_ttl() {
        let cache = RateCache::new(Duration::from_secs(3600));
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(ExchangeRates::from_iter([("USD", 2.0)]))
        };

        let first = cache.get_or_load(load).await.unwrap();
        let second = cache.get_or_load(load).await.unwrap();
        assert_eq!(first.get("USD"), Some(2.0));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reloads_once_expired_or_invalidated() {
        let cache = RateCache::new(Duration::ZERO);
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(ExchangeRates::new())
        };

        cache.get_or_load(load).await.unwrap();
        cache.get_or_load(load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        let cache = RateCache::new(Duration::from_secs(3600));
        cache.get_or_load(load).await.unwrap();
        cache.invalidate().await;
        cache.get_or_load(load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let cache = RateCache::new(Duration::from_secs(3600));
        let failed = cache
            .get_or_load(|| async { Err::<ExchangeRates, _>("connection refused") })
            .await;
        assert!(failed.is_none());

        let loaded = cache
            .get_or_load(|| async { Ok::<_, String>(ExchangeRates::from_iter([("INR", 1.0)])) })
            .await;
        assert_eq!(loaded.unwrap().get("INR"), Some(1.0));
    }
}
