use async_stream::try_stream;
use chrono::NaiveDate;
use futures_util::Stream;
use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::provider::MarketData;
use crate::snapshot::Snapshot;

/// One step of the day walk: the listing on `date` next to the listing on
/// the day before.
#[derive(Debug, Clone)]
pub struct DayWindow {
    /// Position in the walk, for log correlation.
    pub index: usize,
    pub date: NaiveDate,
    pub yesterday: NaiveDate,
    pub today_snapshot: Snapshot,
    pub yesterday_snapshot: Snapshot,
}

pub(crate) async fn fetch_snapshot(market: &dyn MarketData, date: NaiveDate) -> Result<Snapshot> {
    let entries = market
        .active_tickers(date)
        .await
        .map_err(|source| ReconcileError::Fetch {
            op: "active_tickers",
            date: Some(date),
            source,
        })?;
    let snapshot = Snapshot::from_entries(entries);
    debug!(%date, tickers = snapshot.len(), source = market.name(), "snapshot loaded");
    Ok(snapshot)
}

/// Windows for every day in `(start, end]`. Each snapshot is fetched once;
/// the previous window's today becomes the next window's yesterday.
///
/// A fetch failure ends the stream with that error.
pub fn day_windows(
    market: &dyn MarketData,
    start: NaiveDate,
    end: NaiveDate,
) -> impl Stream<Item = Result<DayWindow>> + Send + '_ {
    try_stream! {
        let mut yesterday = start;
        let mut yesterday_snapshot = fetch_snapshot(market, start).await?;
        let mut index = 0;

        while let Some(date) = yesterday.succ_opt().filter(|d| *d <= end) {
            let today_snapshot = fetch_snapshot(market, date).await?;
            let window = DayWindow {
                index,
                date,
                yesterday,
                today_snapshot: today_snapshot.clone(),
                yesterday_snapshot: std::mem::replace(&mut yesterday_snapshot, today_snapshot),
            };
            yield window;
            yesterday = date;
            index += 1;
        }
    }
}
