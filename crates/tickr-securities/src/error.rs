use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no market data API key configured")]
    MissingApiKey,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("database error during {op}: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to fetch {op}{}: {source}", for_date(.date))]
    Fetch {
        op: &'static str,
        date: Option<NaiveDate>,
        #[source]
        source: MarketDataError,
    },

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// The decision tree reached a gap check not fetched before the day began.
    #[error("no trading-gap answer for {ticker}")]
    GapNotChecked { ticker: String },
}

fn for_date(date: &Option<NaiveDate>) -> String {
    date.map(|d| format!(" for {d}")).unwrap_or_default()
}

impl ReconcileError {
    /// `map_err` adapter that tags a rusqlite error with the statement it came from.
    pub(crate) fn db(op: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Database { op, source }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
