//! `tickr-securities`: keeps the `securities` table in step with the
//! exchange's daily listing.
//!
//! Each day's listing is diffed against the day before and every change is
//! classified before it touches the table:
//!
//! | Change            | Table effect                                          |
//! |-------------------|-------------------------------------------------------|
//! | false delist      | `max_date` cleared on the closed row                  |
//! | ticker change     | old row closed, new row opened with same `security_id` |
//! | FIGI change       | `figi` updated on the active row                      |
//! | new listing       | fresh row with a new `security_id`                    |
//! | removal           | active row closed as of the previous day              |
//!
//! Rows sharing a non-empty FIGI form one instrument's history; a ticker with
//! no FIGI is its own lineage and is looked up by ticker alone.

pub mod cik;
pub mod db;
pub mod error;
pub mod polygon;
pub mod provider;
pub mod reconcile;
pub mod snapshot;
pub mod types;
pub mod window;

pub use cik::{backfill_cik, CikReport};
pub use db::SecuritiesDb;
pub use error::{MarketDataError, ReconcileError, Result};
pub use polygon::PolygonClient;
pub use provider::{MarketData, StaticMarketData};
pub use reconcile::{reconcile_day, Reconciler};
pub use snapshot::{is_valid_ticker, Snapshot, SnapshotDiff};
pub use types::{CompanyTicker, Outcome, ReconcileReport, SecurityRow, TickerEntry};
pub use window::{day_windows, DayWindow};
