use std::sync::Arc;

use async_trait::async_trait;
use tickr_queue::{TaskArgs, TaskContext, TaskHandler};
use tickr_scheduler::{JobContext, JobHandler, JobOutput};
use tickr_securities::{backfill_cik, MarketData, Reconciler, SecuritiesDb};
use tracing::info;

pub const UPDATE_SECURITIES: &str = "update_securities";
pub const SIMPLE_UPDATE_SECURITIES: &str = "simple_update_securities";
pub const UPDATE_SECURITY_CIK: &str = "update_security_cik";

/// Full incremental reconciliation walk up to today's exchange date.
pub struct UpdateSecurities {
    reconciler: Reconciler,
}

impl UpdateSecurities {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl JobHandler for UpdateSecurities {
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<JobOutput> {
        let report = self.reconciler.run(ctx.date()).await?;
        Ok(JobOutput::summary(report.to_string()))
    }
}

/// One-day top-up of today's listing against the table's active rows.
pub struct SimpleUpdateSecurities {
    reconciler: Reconciler,
}

impl SimpleUpdateSecurities {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl JobHandler for SimpleUpdateSecurities {
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<JobOutput> {
        let report = self.reconciler.simple_update(ctx.date()).await?;
        Ok(JobOutput::summary(report.to_string()))
    }
}

/// Hands the CIK backfill to a worker.
pub struct EnqueueCikUpdate;

#[async_trait]
impl JobHandler for EnqueueCikUpdate {
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<JobOutput> {
        let id = ctx.queue.enqueue(UPDATE_SECURITY_CIK, TaskArgs::new()).await?;
        info!(task_id = %id, "cik backfill enqueued");
        Ok(JobOutput::enqueued(vec![id]))
    }
}

/// Worker side of [`EnqueueCikUpdate`].
pub struct CikBackfillTask {
    db: Arc<SecuritiesDb>,
    market: Arc<dyn MarketData>,
}

impl CikBackfillTask {
    pub fn new(db: Arc<SecuritiesDb>, market: Arc<dyn MarketData>) -> Self {
        Self { db, market }
    }
}

#[async_trait]
impl TaskHandler for CikBackfillTask {
    async fn handle(&self, ctx: &TaskContext, _args: &TaskArgs) -> anyhow::Result<serde_json::Value> {
        ctx.info(&format!("fetching company tickers from {}", self.market.name()))
            .await;
        let report = backfill_cik(&self.db, self.market.as_ref()).await?;
        ctx.info(&format!(
            "updated {} row(s) from {} companies",
            report.updated, report.companies
        ))
        .await;
        if report.failed > 0 {
            ctx.warn(&format!("{} update(s) failed", report.failed)).await;
        }
        Ok(serde_json::to_value(&report)?)
    }
}
