// End-to-end day walks over an in-memory table and a static feed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tickr_core::config::ReconcileConfig;
use tickr_securities::{
    MarketData, ReconcileError, Reconciler, SecuritiesDb, StaticMarketData, TickerEntry,
};

fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, n).unwrap()
}

fn listing(pairs: &[(&str, &str)]) -> Vec<TickerEntry> {
    pairs.iter().map(|(t, f)| TickerEntry::new(*t, *f)).collect()
}

fn reconciler(market: StaticMarketData, start: NaiveDate) -> Reconciler {
    let db = Arc::new(SecuritiesDb::open_in_memory().unwrap());
    let market: Arc<dyn MarketData> = Arc::new(market);
    Reconciler::new(
        db,
        market,
        ReconcileConfig {
            coverage_start: start,
            test_mode: false,
        },
    )
}

fn assert_one_active_row_per_ticker(db: &SecuritiesDb) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for row in db.active_rows().unwrap() {
        *seen.entry(row.ticker).or_default() += 1;
    }
    for (ticker, count) in seen {
        assert_eq!(count, 1, "{ticker} has {count} active rows");
    }
}

#[tokio::test]
async fn ticker_rename_closes_old_row_and_opens_sibling() {
    let market = StaticMarketData::new()
        .with_snapshot(day(1), listing(&[("AAPL", "figiA"), ("MSFT", "figiM")]))
        .with_snapshot(day(2), listing(&[("AAPL", "figiA"), ("MSFT2", "figiM")]));
    let r = reconciler(market, day(1));

    let report = r.run(day(2)).await.unwrap();
    assert_eq!(report.ticker_changes, 1);

    let db = r.db();
    let msft = db.rows_for_ticker("MSFT").unwrap();
    assert_eq!(msft.len(), 1);
    assert_eq!(msft[0].max_date, Some(day(2)));

    let msft2 = db.active_by_ticker("MSFT2").unwrap().unwrap();
    assert_eq!(msft2.min_date, Some(day(2)));
    assert_eq!(msft2.figi, "figiM");
    assert_eq!(msft2.security_id, msft[0].security_id);

    let aapl = db.rows_for_ticker("AAPL").unwrap();
    assert_eq!(aapl.len(), 1);
    assert!(aapl[0].is_active());
    assert_eq!(aapl[0].min_date, Some(day(1)));

    assert_one_active_row_per_ticker(db);
}

#[tokio::test]
async fn transient_omission_is_healed_as_false_delist() {
    let market = StaticMarketData::new()
        .with_snapshot(day(1), listing(&[("TSLA", "figiT")]))
        .with_snapshot(day(2), Vec::new())
        .with_snapshot(day(3), listing(&[("TSLA", "figiT")]))
        .with_bar("TSLA", day(2));
    let r = reconciler(market, day(1));

    let report = r.run(day(3)).await.unwrap();
    assert_eq!(report.false_delists, 1);

    let rows = r.db().rows_for_ticker("TSLA").unwrap();
    assert_eq!(rows.len(), 1, "no gap row may survive");
    assert!(rows[0].is_active());
}

#[tokio::test]
async fn rename_after_recorded_delist_heals_old_row() {
    // OLD vanishes on day 2 though it kept trading, then comes back as NEW on day 3
    let market = StaticMarketData::new()
        .with_snapshot(day(1), listing(&[("OLD", "F")]))
        .with_snapshot(day(2), Vec::new())
        .with_snapshot(day(3), listing(&[("NEW", "F")]))
        .with_bar("OLD", day(2));
    let r = reconciler(market, day(1));

    let report = r.run(day(3)).await.unwrap();
    assert_eq!(report.ticker_changes, 1);

    let old = r.db().rows_for_ticker("OLD").unwrap();
    assert_eq!(old[0].max_date, Some(day(3)));
    let new = r.db().active_by_ticker("NEW").unwrap().unwrap();
    assert_eq!(new.security_id, old[0].security_id);
}

#[tokio::test]
async fn secondary_classes_are_never_tracked() {
    let market = StaticMarketData::new()
        .with_snapshot(day(1), listing(&[("BRK.A", "f1"), ("IBM", "fi")]))
        .with_snapshot(day(2), listing(&[("BRK.B", "f2"), ("IBM", "fi"), ("ACMEw", "f3")]));
    let r = reconciler(market, day(1));

    let report = r.run(day(2)).await.unwrap();
    assert_eq!(report.new_listings, 1); // IBM seeded
    assert_eq!(report.removals, 0);
    let active: Vec<String> = r.db().active_rows().unwrap().into_iter().map(|r| r.ticker).collect();
    assert_eq!(active, vec!["IBM".to_string()]);
}

#[tokio::test]
async fn fetch_failure_keeps_committed_days() {
    let market = StaticMarketData::new()
        .with_snapshot(day(1), listing(&[("A", "1")]))
        .with_snapshot(day(2), listing(&[("A", "1"), ("B", "2")]))
        .failing_on(day(3));
    let r = reconciler(market, day(1));

    let err = r.run(day(4)).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Fetch { op: "active_tickers", .. }));
    assert!(err.to_string().contains("2024-04-03"));
    assert!(r.db().active_by_ticker("B").unwrap().is_some());
}

#[tokio::test]
async fn incremental_run_resumes_from_latest_min_date() {
    let market = StaticMarketData::new()
        .with_snapshot(day(1), listing(&[("A", "1")]))
        .with_snapshot(day(2), listing(&[("A", "1"), ("B", "2")]))
        .with_snapshot(day(3), listing(&[("A", "1"), ("B", "2")]))
        .with_snapshot(day(4), listing(&[("B", "2"), ("C", "3")]));
    let r = reconciler(market, day(1));

    r.run(day(2)).await.unwrap();
    assert_eq!(r.start_date().unwrap(), day(2));

    let second = r.run(day(4)).await.unwrap();
    assert_eq!(second.days, 2);
    assert_eq!(second.new_listings, 1);
    assert_eq!(second.removals, 1);
    assert_eq!(r.db().rows_for_ticker("A").unwrap()[0].max_date, Some(day(3)));
    assert_eq!(r.db().rows_for_ticker("B").unwrap().len(), 1);
    assert_one_active_row_per_ticker(r.db());
}

#[tokio::test]
async fn simple_update_diffs_against_active_rows() {
    let market = StaticMarketData::new()
        .with_snapshot(day(1), listing(&[("A", "1"), ("B", "2")]))
        .with_snapshot(day(9), listing(&[("A", "1"), ("C", "3")]));
    let r = reconciler(market, day(1));
    r.run(day(1)).await.unwrap();

    let report = r.simple_update(day(9)).await.unwrap();
    assert_eq!(report.new_listings, 1);
    assert_eq!(report.removals, 1);
    assert_eq!(r.db().rows_for_ticker("B").unwrap()[0].max_date, Some(day(8)));
    assert_eq!(r.db().active_by_ticker("C").unwrap().unwrap().min_date, Some(day(9)));
}

#[tokio::test]
async fn start_after_end_is_rejected() {
    let r = reconciler(StaticMarketData::new(), day(5));
    assert!(matches!(
        r.run(day(4)).await,
        Err(ReconcileError::InvalidRange { .. })
    ));
}
