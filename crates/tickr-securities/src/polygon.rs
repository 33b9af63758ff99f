use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tickr_core::config::{MarketDataConfig, SecConfig};
use tracing::{debug, warn};

use crate::error::MarketDataError;
use crate::provider::MarketData;
use crate::types::{CompanyTicker, TickerEntry};

const PAGE_LIMIT: u32 = 1000;

/// REST adapter for the Polygon.io reference and aggregates endpoints plus
/// the SEC company-ticker file.
pub struct PolygonClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    sec_base_url: String,
    sec_user_agent: String,
}

impl PolygonClient {
    pub fn new(api_key: Option<String>, base_url: String, sec: &SecConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            sec_base_url: sec.base_url.trim_end_matches('/').to_string(),
            sec_user_agent: sec.user_agent.clone(),
        }
    }

    /// Build from config, falling back to `POLYGON_API_KEY` for the key.
    /// A missing key only fails once a Polygon endpoint is called.
    pub fn from_config(config: &MarketDataConfig, sec: &SecConfig) -> Self {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("POLYGON_API_KEY").ok())
            .filter(|k| !k.is_empty());
        Self::new(api_key, config.base_url.clone(), sec)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, MarketDataError> {
        let api_key = self.api_key.as_deref().ok_or(MarketDataError::MissingApiKey)?;
        let resp = self
            .client
            .get(url)
            .query(query)
            .query(&[("apiKey", api_key)])
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Polygon API error");
            return Err(MarketDataError::Api {
                status,
                message: text,
            });
        }

        resp.json()
            .await
            .map_err(|e| MarketDataError::Parse(e.to_string()))
    }
}

#[derive(Deserialize)]
struct TickersPage {
    #[serde(default)]
    results: Vec<TickerEntry>,
    next_url: Option<String>,
}

#[derive(Deserialize)]
struct AggsResponse {
    #[serde(default, rename = "resultsCount")]
    results_count: u64,
}

#[derive(Deserialize)]
struct SecEntry {
    cik_str: u64,
    ticker: String,
    title: String,
}

#[async_trait]
impl MarketData for PolygonClient {
    fn name(&self) -> &str {
        "polygon"
    }

    async fn active_tickers(&self, date: NaiveDate) -> Result<Vec<TickerEntry>, MarketDataError> {
        let mut entries = Vec::new();
        let mut page: TickersPage = self
            .get_json(
                &format!("{}/v3/reference/tickers", self.base_url),
                &[
                    ("market", "stocks".to_string()),
                    ("active", "true".to_string()),
                    ("date", date.to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ],
            )
            .await?;

        loop {
            entries.append(&mut page.results);
            // next_url already carries the cursor and filters
            let Some(next) = page.next_url.take() else {
                break;
            };
            page = self.get_json(&next, &[]).await?;
        }

        debug!(%date, count = entries.len(), "fetched active tickers");
        Ok(entries)
    }

    async fn has_daily_bar(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<bool, MarketDataError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}",
            self.base_url, ticker, from, to
        );
        let resp: AggsResponse = self
            .get_json(&url, &[("adjusted", "true".to_string()), ("limit", "1".to_string())])
            .await?;
        Ok(resp.results_count > 0)
    }

    async fn sec_company_tickers(&self) -> Result<Vec<CompanyTicker>, MarketDataError> {
        let url = format!("{}/files/company_tickers.json", self.sec_base_url);
        let resp = self
            .client
            .get(&url)
            .header("user-agent", &self.sec_user_agent)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "SEC company tickers error");
            return Err(MarketDataError::Api {
                status,
                message: text,
            });
        }

        // Keyed by row number: {"0": {"cik_str": 320193, "ticker": "AAPL", ...}, ...}
        let raw: HashMap<String, SecEntry> = resp
            .json()
            .await
            .map_err(|e| MarketDataError::Parse(e.to_string()))?;

        let mut companies: Vec<CompanyTicker> = raw
            .into_values()
            .map(|e| CompanyTicker {
                cik: format!("{:010}", e.cik_str),
                ticker: e.ticker,
                name: e.title,
            })
            .collect();
        companies.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(companies)
    }
}
