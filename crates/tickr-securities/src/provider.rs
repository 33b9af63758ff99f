use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::MarketDataError;
use crate::types::{CompanyTicker, TickerEntry};

/// Upstream market data consumed by reconciliation and the CIK backfill.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Stable identifier for logs (e.g. `"polygon"`).
    fn name(&self) -> &str;

    /// Every listing the exchange reports as active on `date`, unfiltered.
    async fn active_tickers(&self, date: NaiveDate) -> Result<Vec<TickerEntry>, MarketDataError>;

    /// Whether at least one daily bar exists for `ticker` in `from..=to`.
    async fn has_daily_bar(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<bool, MarketDataError>;

    async fn sec_company_tickers(&self) -> Result<Vec<CompanyTicker>, MarketDataError>;
}

/// Market data held in memory. Used for dry runs and by tests; a date with
/// no snapshot loaded reports an empty listing.
#[derive(Default)]
pub struct StaticMarketData {
    snapshots: Mutex<BTreeMap<NaiveDate, Vec<TickerEntry>>>,
    bars: Mutex<BTreeSet<(String, NaiveDate)>>,
    companies: Mutex<Vec<CompanyTicker>>,
    failing_dates: Mutex<BTreeSet<NaiveDate>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(self, date: NaiveDate, entries: Vec<TickerEntry>) -> Self {
        self.snapshots.lock().unwrap().insert(date, entries);
        self
    }

    pub fn with_bar(self, ticker: &str, date: NaiveDate) -> Self {
        self.bars.lock().unwrap().insert((ticker.to_string(), date));
        self
    }

    pub fn with_company(self, company: CompanyTicker) -> Self {
        self.companies.lock().unwrap().push(company);
        self
    }

    /// Make `active_tickers(date)` fail, simulating an upstream outage.
    pub fn failing_on(self, date: NaiveDate) -> Self {
        self.failing_dates.lock().unwrap().insert(date);
        self
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    fn name(&self) -> &str {
        "static"
    }

    async fn active_tickers(&self, date: NaiveDate) -> Result<Vec<TickerEntry>, MarketDataError> {
        if self.failing_dates.lock().unwrap().contains(&date) {
            return Err(MarketDataError::Api {
                status: 503,
                message: format!("no listing available for {date}"),
            });
        }
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }

    async fn has_daily_bar(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<bool, MarketDataError> {
        Ok(self
            .bars
            .lock()
            .unwrap()
            .iter()
            .any(|(t, d)| t == ticker && *d >= from && *d <= to))
    }

    async fn sec_company_tickers(&self) -> Result<Vec<CompanyTicker>, MarketDataError> {
        Ok(self.companies.lock().unwrap().clone())
    }
}
