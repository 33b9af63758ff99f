use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::types::TickerEntry;

/// Tickers with a dot or any lowercase letter denote secondary share classes
/// and when-issued lines, which are not tracked.
pub fn is_valid_ticker(ticker: &str) -> bool {
    !ticker.is_empty() && !ticker.contains('.') && !ticker.chars().any(char::is_lowercase)
}

/// Filtered `ticker -> entry` map of one day's active listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, TickerEntry>,
}

impl Snapshot {
    /// Build from raw feed entries. Invalid tickers are dropped; when a ticker
    /// appears twice the first entry wins.
    pub fn from_entries(entries: impl IntoIterator<Item = TickerEntry>) -> Self {
        let mut map: BTreeMap<String, TickerEntry> = BTreeMap::new();
        let mut rejected = 0usize;
        for entry in entries {
            if !is_valid_ticker(&entry.ticker) {
                rejected += 1;
                continue;
            }
            if let Some(first) = map.get(&entry.ticker) {
                warn!(
                    ticker = %entry.ticker,
                    kept_figi = %first.composite_figi,
                    dropped_figi = %entry.composite_figi,
                    "duplicate ticker in snapshot, keeping first"
                );
                continue;
            }
            map.insert(entry.ticker.clone(), entry);
        }
        if rejected > 0 {
            debug!(rejected, kept = map.len(), "filtered snapshot");
        }
        Self { entries: map }
    }

    pub fn get(&self, ticker: &str) -> Option<&TickerEntry> {
        self.entries.get(ticker)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.entries.contains_key(ticker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickerEntry> {
        self.entries.values()
    }

    /// Compare `self` (yesterday) against `today`.
    pub fn diff(&self, today: &Snapshot) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();
        for (ticker, entry) in &today.entries {
            match self.entries.get(ticker) {
                None => diff.additions.push(entry.clone()),
                Some(prev) if prev.composite_figi != entry.composite_figi => {
                    if entry.has_figi() {
                        diff.figi_changes.push(entry.clone());
                    } else {
                        // feed dropped the FIGI; keep the lineage we have
                        debug!(%ticker, figi = %prev.composite_figi, "figi missing from today's feed");
                    }
                }
                Some(_) => {}
            }
        }
        diff.removals = self
            .entries
            .keys()
            .filter(|t| !today.entries.contains_key(*t))
            .cloned()
            .collect();
        diff
    }
}

impl FromIterator<TickerEntry> for Snapshot {
    fn from_iter<I: IntoIterator<Item = TickerEntry>>(iter: I) -> Self {
        Self::from_entries(iter)
    }
}

/// The three disjoint change sets between two consecutive snapshots, each
/// sorted by ticker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub additions: Vec<TickerEntry>,
    pub removals: Vec<String>,
    pub figi_changes: Vec<TickerEntry>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty() && self.figi_changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn snap(pairs: &[(&str, &str)]) -> Snapshot {
        pairs.iter().map(|(t, f)| TickerEntry::new(*t, *f)).collect()
    }

    #[test]
    fn validity_filter() {
        assert!(is_valid_ticker("AAPL"));
        assert!(is_valid_ticker("BRK-B"));
        assert!(!is_valid_ticker("BRK.B"));
        assert!(!is_valid_ticker("AAPLw"));
        assert!(!is_valid_ticker(""));

        let s = snap(&[("BRK.A", "f1"), ("ABCw", "f2"), ("IBM", "f3")]);
        assert_eq!(s.len(), 1);
        assert!(s.contains("IBM"));
    }

    #[test]
    fn invalid_tickers_never_reach_the_diff() {
        let yesterday = snap(&[("BRK.A", "f1"), ("IBM", "f3")]);
        let today = snap(&[("ABCw", "f2"), ("IBM", "f3")]);
        assert!(yesterday.diff(&today).is_empty());
    }

    #[test]
    fn first_duplicate_wins() {
        let s = snap(&[("IBM", "first"), ("IBM", "second")]);
        assert_eq!(s.get("IBM").unwrap().composite_figi, "first");
    }

    #[test]
    fn diff_classifies_each_ticker_once() {
        let yesterday = snap(&[("AAPL", "figiA"), ("MSFT", "figiM"), ("GE", "old")]);
        let today = snap(&[("AAPL", "figiA"), ("MSFT2", "figiM"), ("GE", "new")]);
        let diff = yesterday.diff(&today);

        assert_eq!(diff.additions, vec![TickerEntry::new("MSFT2", "figiM")]);
        assert_eq!(diff.removals, vec!["MSFT".to_string()]);
        assert_eq!(diff.figi_changes, vec![TickerEntry::new("GE", "new")]);
    }

    #[test]
    fn change_sets_are_pairwise_disjoint() {
        let yesterday = snap(&[("A", "1"), ("B", "2"), ("C", "3"), ("D", ""), ("E", "5")]);
        let today = snap(&[("B", "2"), ("C", "33"), ("D", "4"), ("F", "6"), ("G", "")]);
        let diff = yesterday.diff(&today);

        let adds: HashSet<_> = diff.additions.iter().map(|e| e.ticker.as_str()).collect();
        let rems: HashSet<_> = diff.removals.iter().map(String::as_str).collect();
        let figis: HashSet<_> = diff.figi_changes.iter().map(|e| e.ticker.as_str()).collect();
        assert!(adds.is_disjoint(&rems));
        assert!(adds.is_disjoint(&figis));
        assert!(rems.is_disjoint(&figis));
        assert_eq!(adds, HashSet::from(["F", "G"]));
        assert_eq!(rems, HashSet::from(["A", "E"]));
        assert_eq!(figis, HashSet::from(["C", "D"]));
    }

    #[test]
    fn lost_figi_is_not_a_change() {
        let diff = snap(&[("X", "figi")]).diff(&snap(&[("X", "")]));
        assert!(diff.is_empty());
    }
}
