use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use futures_util::StreamExt;
use tickr_core::config::ReconcileConfig;
use tracing::{debug, error, info, warn};

use crate::db::SecuritiesDb;
use crate::error::{ReconcileError, Result};
use crate::provider::MarketData;
use crate::types::{Outcome, ReconcileReport, SecurityRow, TickerEntry};
use crate::window::{day_windows, fetch_snapshot, DayWindow};

/// Apply one day's diff to the table inside a single transaction.
///
/// Gap checks run before the transaction opens, so the write lock is never
/// held across a network call. Each record applies under its own savepoint;
/// a failing record is logged, counted as `failed` and leaves no writes
/// behind. Only a failure to open or commit the transaction is returned.
pub async fn reconcile_day(
    db: &SecuritiesDb,
    market: &dyn MarketData,
    window: &DayWindow,
) -> Result<ReconcileReport> {
    let diff = window.yesterday_snapshot.diff(&window.today_snapshot);
    let mut report = ReconcileReport {
        days: 1,
        ..Default::default()
    };
    if diff.is_empty() {
        debug!(date = %window.date, "no listing changes");
        return Ok(report);
    }

    let mut checks = GapChecks::collect(db, market, window, &diff.additions).await;

    db.begin()?;

    for entry in &diff.figi_changes {
        match db.atomically(|db| db.update_active_figi(&entry.ticker, &entry.composite_figi)) {
            Ok(0) => {
                warn!(
                    index = window.index,
                    ticker = %entry.ticker,
                    figi = %entry.composite_figi,
                    date = %window.date,
                    "figi change for ticker with no active row"
                );
                report.record(&Outcome::Skipped { reason: "no active row" });
            }
            Ok(_) => report.record(&Outcome::FigiChange),
            Err(e) => {
                log_failure(window, &entry.ticker, &entry.composite_figi, &e);
                report.failed += 1;
            }
        }
    }

    for entry in &diff.additions {
        match db.atomically(|db| apply_addition(db, &mut checks, window, entry)) {
            Ok(outcome) => {
                debug!(ticker = %entry.ticker, date = %window.date, ?outcome, "addition applied");
                report.record(&outcome);
            }
            Err(e) => {
                log_failure(window, &entry.ticker, &entry.composite_figi, &e);
                report.failed += 1;
            }
        }
    }

    for ticker in &diff.removals {
        match db.atomically(|db| apply_removal(db, window, ticker)) {
            Ok(outcome) => report.record(&outcome),
            Err(e) => {
                log_failure(window, ticker, "", &e);
                report.failed += 1;
            }
        }
    }

    if let Err(e) = db.commit() {
        if let Err(rb) = db.rollback() {
            warn!(date = %window.date, "rollback after failed commit also failed: {rb}");
        }
        return Err(e);
    }

    info!(
        index = window.index,
        date = %window.date,
        additions = diff.additions.len(),
        removals = diff.removals.len(),
        figi_changes = diff.figi_changes.len(),
        failed = report.failed,
        "reconciled day"
    );
    Ok(report)
}

fn log_failure(window: &DayWindow, ticker: &str, figi: &str, e: &ReconcileError) {
    error!(
        index = window.index,
        ticker,
        figi,
        date = %window.date,
        "reconciliation step failed: {e}"
    );
}

/// Daily-bar answers for closed rows, gathered before a day's writes begin
/// and keyed by row id.
#[derive(Default)]
struct GapChecks {
    answers: HashMap<i64, Result<bool>>,
}

impl GapChecks {
    async fn collect(
        db: &SecuritiesDb,
        market: &dyn MarketData,
        window: &DayWindow,
        additions: &[TickerEntry],
    ) -> Self {
        let mut checks = Self::default();
        for entry in additions {
            let row = match gap_candidate(db, entry) {
                Ok(Some(row)) => row,
                Ok(None) => continue,
                // the same read fails again under the savepoint and is logged there
                Err(e) => {
                    debug!(ticker = %entry.ticker, "gap candidate lookup failed: {e}");
                    continue;
                }
            };
            if checks.answers.contains_key(&row.id) {
                continue;
            }
            let Some((from, to)) = gap_range(&row, window.yesterday) else {
                continue;
            };
            let answer = market
                .has_daily_bar(&row.ticker, from, to)
                .await
                .map_err(|source| ReconcileError::Fetch {
                    op: "has_daily_bar",
                    date: Some(window.yesterday),
                    source,
                });
            checks.answers.insert(row.id, answer);
        }
        checks
    }

    /// Whether `row`'s ticker kept trading after its recorded close, up to
    /// and including `yesterday`. An active row or a close on or after
    /// `yesterday` leaves no gap.
    fn traded_through_gap(&mut self, row: &SecurityRow, yesterday: NaiveDate) -> Result<bool> {
        if gap_range(row, yesterday).is_none() {
            return Ok(true);
        }
        match self.answers.get(&row.id) {
            Some(Ok(traded)) => Ok(*traded),
            Some(Err(_)) => self.answers.remove(&row.id).unwrap_or(Ok(false)),
            None => Err(ReconcileError::GapNotChecked {
                ticker: row.ticker.clone(),
            }),
        }
    }
}

/// The closed row an addition's decision tree may check for bars, read from the
/// table as it stands before the day's writes.
fn gap_candidate(db: &SecuritiesDb, entry: &TickerEntry) -> Result<Option<SecurityRow>> {
    if entry.has_figi() {
        if let Some(latest) = db.latest_by_figi(&entry.composite_figi)? {
            return Ok((latest.ticker != entry.ticker && !latest.is_active()).then_some(latest));
        }
    }
    Ok(db.latest_by_ticker(&entry.ticker)?.filter(|row| !row.is_active()))
}

fn gap_range(row: &SecurityRow, yesterday: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let closed = row.max_date?;
    let from = closed.succ_opt().filter(|d| *d <= yesterday)?;
    Some((from, yesterday))
}

/// Decide what a ticker appearing today means for the table.
fn apply_addition(
    db: &SecuritiesDb,
    checks: &mut GapChecks,
    window: &DayWindow,
    entry: &TickerEntry,
) -> Result<Outcome> {
    let ticker = entry.ticker.as_str();
    let figi = entry.composite_figi.as_str();

    if entry.has_figi() {
        if let Some(latest) = db.latest_by_figi(figi)? {
            return apply_known_figi(db, checks, window, entry, latest);
        }
    }

    match db.latest_by_ticker(ticker)? {
        Some(row) if row.is_active() => {
            if entry.has_figi() && row.figi != figi {
                db.set_figi(row.id, figi)?;
                Ok(Outcome::FigiChange)
            } else {
                Ok(Outcome::Unchanged)
            }
        }
        Some(row) => {
            if checks.traded_through_gap(&row, window.yesterday)? {
                if entry.has_figi() {
                    db.reopen(row.id, Some(figi))?;
                    Ok(Outcome::FalseDelistFigiChange)
                } else {
                    db.reopen(row.id, None)?;
                    Ok(Outcome::FalseDelist)
                }
            } else {
                db.insert_listing(entry, window.date, None)?;
                Ok(Outcome::NewListing { reused_ticker: true })
            }
        }
        None => {
            db.insert_listing(entry, window.date, None)?;
            Ok(Outcome::NewListing { reused_ticker: false })
        }
    }
}

/// Addition whose FIGI already has a chain in the table.
fn apply_known_figi(
    db: &SecuritiesDb,
    checks: &mut GapChecks,
    window: &DayWindow,
    entry: &TickerEntry,
    latest: SecurityRow,
) -> Result<Outcome> {
    let ticker = entry.ticker.as_str();

    if latest.ticker == ticker {
        if latest.is_active() {
            return Ok(Outcome::Unchanged);
        }
        db.reopen(latest.id, None)?;
        return Ok(Outcome::FalseDelist);
    }

    if db.figi_history_has_ticker(&entry.composite_figi, ticker, latest.id)? {
        warn!(
            index = window.index,
            ticker,
            target = %latest.ticker,
            figi = %entry.composite_figi,
            date = %window.date,
            "ticker reverts to an earlier name of the same figi, skipping"
        );
        return Ok(Outcome::Skipped {
            reason: "ticker already in figi history",
        });
    }

    // Ticker change. Free the new ticker first so it never has two active rows.
    if let Some(stale) = db.active_by_ticker(ticker)? {
        warn!(
            ticker,
            stale_figi = %stale.figi,
            date = %window.date,
            "closing unrelated active row before rename"
        );
        db.set_max_date(stale.id, window.yesterday)?;
    }

    let healed = match latest.max_date {
        None => {
            db.set_max_date(latest.id, window.date)?;
            false
        }
        Some(_) => {
            let healed = checks.traded_through_gap(&latest, window.yesterday)?;
            if healed {
                db.set_max_date(latest.id, window.date)?;
            }
            healed
        }
    };
    db.insert_listing(entry, window.date, Some(latest.security_id))?;

    info!(
        from = %latest.ticker,
        to = ticker,
        figi = %entry.composite_figi,
        date = %window.date,
        healed,
        "ticker change"
    );
    Ok(Outcome::TickerChange {
        from: latest.ticker,
        healed,
    })
}

fn apply_removal(db: &SecuritiesDb, window: &DayWindow, ticker: &str) -> Result<Outcome> {
    if db.close_active(ticker, window.yesterday)? > 0 {
        return Ok(Outcome::Removal);
    }
    if db.has_rows(ticker)? {
        debug!(ticker, date = %window.date, "removal of already closed ticker");
        Ok(Outcome::AlreadyClosed)
    } else {
        warn!(
            index = window.index,
            ticker,
            date = %window.date,
            "removal of ticker with no listing history"
        );
        Ok(Outcome::Skipped {
            reason: "no listing history",
        })
    }
}

/// Drives the day walk and the one-day top-up over a table and a feed.
#[derive(Clone)]
pub struct Reconciler {
    db: Arc<SecuritiesDb>,
    market: Arc<dyn MarketData>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(db: Arc<SecuritiesDb>, market: Arc<dyn MarketData>, config: ReconcileConfig) -> Self {
        Self { db, market, config }
    }

    pub fn db(&self) -> &Arc<SecuritiesDb> {
        &self.db
    }

    pub fn market(&self) -> &Arc<dyn MarketData> {
        &self.market
    }

    /// Where a walk ending at `end` starts: coverage start in test mode or on
    /// an empty table, otherwise the newest `min_date`.
    pub fn start_date(&self) -> Result<NaiveDate> {
        if self.config.test_mode {
            return Ok(self.config.coverage_start);
        }
        Ok(self
            .db
            .latest_min_date()?
            .unwrap_or(self.config.coverage_start))
    }

    /// Walk every day from [`start_date`](Self::start_date) through `end`.
    ///
    /// Days commit one at a time; a snapshot fetch failure stops the walk and
    /// leaves the days already committed in place.
    pub async fn run(&self, end: NaiveDate) -> Result<ReconcileReport> {
        let start = self.start_date()?;
        if start > end {
            return Err(ReconcileError::InvalidRange { start, end });
        }
        info!(%start, %end, source = self.market.name(), "securities reconciliation started");

        let mut total = ReconcileReport::default();
        total.new_listings += self.seed_if_empty(start).await?;

        let mut windows = Box::pin(day_windows(self.market.as_ref(), start, end));
        while let Some(window) = windows.next().await {
            let window = window?;
            let report = reconcile_day(&self.db, self.market.as_ref(), &window).await?;
            total.merge(&report);
        }

        info!(%total, "securities reconciliation finished");
        Ok(total)
    }

    /// An empty table takes the first day's listing wholesale.
    async fn seed_if_empty(&self, start: NaiveDate) -> Result<u32> {
        if self.db.has_any_row()? {
            return Ok(0);
        }
        let snapshot = fetch_snapshot(self.market.as_ref(), start).await?;
        self.db.begin()?;
        let mut seeded = 0;
        for entry in snapshot.iter() {
            match self.db.insert_listing(entry, start, None) {
                Ok(_) => seeded += 1,
                Err(e) => error!(ticker = %entry.ticker, date = %start, "seed insert failed: {e}"),
            }
        }
        if let Err(e) = self.db.commit() {
            if let Err(rb) = self.db.rollback() {
                warn!(%start, "rollback after failed seed commit also failed: {rb}");
            }
            return Err(e);
        }
        info!(%start, seeded, "seeded empty securities table");
        Ok(seeded)
    }

    /// Reconcile `date`'s listing against the table's active rows only.
    pub async fn simple_update(&self, date: NaiveDate) -> Result<ReconcileReport> {
        let today_snapshot = fetch_snapshot(self.market.as_ref(), date).await?;
        let window = DayWindow {
            index: 0,
            date,
            yesterday: date.checked_sub_days(Days::new(1)).unwrap_or(date),
            today_snapshot,
            yesterday_snapshot: self.db.active_snapshot()?,
        };
        let report = reconcile_day(&self.db, self.market.as_ref(), &window).await?;
        info!(%date, %report, "simple securities update finished");
        Ok(report)
    }
}
