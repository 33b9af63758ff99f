use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One listing as reported by the exchange feed for a given date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerEntry {
    pub ticker: String,
    /// Composite FIGI; empty when the feed has none.
    #[serde(default)]
    pub composite_figi: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub primary_exchange: Option<String>,
    #[serde(default)]
    pub cik: Option<String>,
}

impl TickerEntry {
    pub fn new(ticker: impl Into<String>, composite_figi: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            composite_figi: composite_figi.into(),
            ..Self::default()
        }
    }

    pub fn has_figi(&self) -> bool {
        !self.composite_figi.is_empty()
    }
}

/// A row of the `securities` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityRow {
    pub id: i64,
    /// Shared by every row in one rename chain.
    pub security_id: i64,
    pub ticker: String,
    pub figi: String,
    pub min_date: Option<NaiveDate>,
    /// `None` while the listing is active.
    pub max_date: Option<NaiveDate>,
    pub cik: Option<String>,
    pub name: Option<String>,
}

impl SecurityRow {
    pub fn is_active(&self) -> bool {
        self.max_date.is_none()
    }
}

/// An entry of the SEC company-ticker list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyTicker {
    /// Zero-padded to ten digits.
    pub cik: String,
    pub ticker: String,
    pub name: String,
}

/// What one decision-tree step did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Ticker already active with the same identity; nothing written.
    Unchanged,
    FalseDelist,
    FigiChange,
    FalseDelistFigiChange,
    /// `healed` is set when the old ticker's earlier close turned out to be
    /// a feed omission and was moved forward to the rename date.
    TickerChange { from: String, healed: bool },
    /// `reused_ticker` is set when the ticker had an earlier, unrelated row.
    NewListing { reused_ticker: bool },
    Removal,
    /// Removal of a ticker whose active row was already closed.
    AlreadyClosed,
    Skipped { reason: &'static str },
}

/// Per-outcome counts for one day or a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub days: u32,
    pub false_delists: u32,
    pub ticker_changes: u32,
    pub figi_changes: u32,
    pub new_listings: u32,
    pub removals: u32,
    pub unchanged: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl ReconcileReport {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::FalseDelist => self.false_delists += 1,
            Outcome::FigiChange => self.figi_changes += 1,
            Outcome::FalseDelistFigiChange => {
                self.false_delists += 1;
                self.figi_changes += 1;
            }
            Outcome::TickerChange { .. } => self.ticker_changes += 1,
            Outcome::NewListing { .. } => self.new_listings += 1,
            Outcome::Removal | Outcome::AlreadyClosed => self.removals += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &ReconcileReport) {
        self.days += other.days;
        self.false_delists += other.false_delists;
        self.ticker_changes += other.ticker_changes;
        self.figi_changes += other.figi_changes;
        self.new_listings += other.new_listings;
        self.removals += other.removals;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} day(s): {} new, {} removed, {} renamed, {} figi changes, {} false delists, {} skipped, {} failed",
            self.days,
            self.new_listings,
            self.removals,
            self.ticker_changes,
            self.figi_changes,
            self.false_delists,
            self.skipped,
            self.failed
        )
    }
}
