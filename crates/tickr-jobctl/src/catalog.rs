use std::sync::Arc;

use tickr_core::config::SchedulerConfig;
use tickr_queue::HandlerRegistry;
use tickr_scheduler::{Job, JobRegistry};
use tickr_securities::{MarketData, Reconciler, SecuritiesDb};

use crate::jobs::{
    CikBackfillTask, EnqueueCikUpdate, SimpleUpdateSecurities, UpdateSecurities,
    SIMPLE_UPDATE_SECURITIES, UPDATE_SECURITIES, UPDATE_SECURITY_CIK,
};

/// The jobs the scheduler runs, bound to the configured boundaries.
pub fn job_registry(
    reconciler: Reconciler,
    scheduler: &SchedulerConfig,
) -> tickr_scheduler::Result<JobRegistry> {
    let mut registry = JobRegistry::new();
    registry.register(
        Job::new(UPDATE_SECURITIES, Arc::new(UpdateSecurities::new(reconciler.clone())))
            .at(scheduler.market_open)
            .skip_weekends()
            .run_on_init(),
    )?;
    registry.register(
        Job::new(SIMPLE_UPDATE_SECURITIES, Arc::new(SimpleUpdateSecurities::new(reconciler)))
            .at(scheduler.market_close)
            .skip_weekends(),
    )?;
    registry.register(
        Job::new(UPDATE_SECURITY_CIK, Arc::new(EnqueueCikUpdate))
            .at(scheduler.market_close)
            .skip_weekends(),
    )?;
    Ok(registry)
}

/// Task handlers a worker process serves.
pub fn handler_registry(
    db: Arc<SecuritiesDb>,
    market: Arc<dyn MarketData>,
) -> tickr_queue::Result<HandlerRegistry> {
    let mut handlers = HandlerRegistry::new();
    handlers.register(UPDATE_SECURITY_CIK, Arc::new(CikBackfillTask::new(db, market)))?;
    Ok(handlers)
}
