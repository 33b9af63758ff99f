use serde::Serialize;
use tracing::{info, warn};

use crate::db::SecuritiesDb;
use crate::error::{ReconcileError, Result};
use crate::provider::MarketData;
use crate::snapshot::is_valid_ticker;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CikReport {
    pub companies: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Copy CIKs from the SEC company-ticker list onto active rows, in one pass
/// and one transaction.
pub async fn backfill_cik(db: &SecuritiesDb, market: &dyn MarketData) -> Result<CikReport> {
    let companies = market
        .sec_company_tickers()
        .await
        .map_err(|source| ReconcileError::Fetch {
            op: "sec_company_tickers",
            date: None,
            source,
        })?;

    let mut report = CikReport {
        companies: companies.len(),
        ..Default::default()
    };

    db.begin()?;
    for company in companies.iter().filter(|c| is_valid_ticker(&c.ticker)) {
        match db.set_cik(&company.ticker, &company.cik) {
            Ok(n) => report.updated += n,
            Err(e) => {
                warn!(ticker = %company.ticker, cik = %company.cik, "cik update failed: {e}");
                report.failed += 1;
            }
        }
    }
    if let Err(e) = db.commit() {
        if let Err(rb) = db.rollback() {
            warn!("rollback after failed cik commit also failed: {rb}");
        }
        return Err(e);
    }

    info!(
        companies = report.companies,
        updated = report.updated,
        failed = report.failed,
        "cik backfill finished"
    );
    Ok(report)
}
