use std::sync::Arc;
use std::time::Duration;

use tickr_core::TickrConfig;
use tickr_queue::{HandlerRegistry, TaskQueue, Worker};
use tickr_scheduler::{JobRegistry, Scheduler};
use tickr_securities::{MarketData, PolygonClient, Reconciler, SecuritiesDb};
use tracing::info;

use crate::catalog;
use crate::monitor::TaskMonitor;

/// Everything a `jobctl` command can reach, wired from config.
pub struct App {
    pub config: TickrConfig,
    pub queue: TaskQueue,
    pub db: Arc<SecuritiesDb>,
    pub market: Arc<dyn MarketData>,
}

impl App {
    pub async fn connect(config: TickrConfig) -> anyhow::Result<Self> {
        let cache = tickr_queue::cache::open(&config).await?;
        let queue = TaskQueue::new(cache)
            .with_queue_key(&config.cache.queue_key)
            .with_lease_secs(config.queue.lease_secs);

        info!(path = %config.database.path, "opening securities database");
        let db = Arc::new(SecuritiesDb::open(&config.database.path)?);
        let market: Arc<dyn MarketData> =
            Arc::new(PolygonClient::from_config(&config.market_data, &config.sec));

        Ok(Self::new(config, queue, db, market))
    }

    pub fn new(
        config: TickrConfig,
        queue: TaskQueue,
        db: Arc<SecuritiesDb>,
        market: Arc<dyn MarketData>,
    ) -> Self {
        Self {
            config,
            queue,
            db,
            market,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.db.clone(),
            self.market.clone(),
            self.config.reconcile.clone(),
        )
    }

    pub fn jobs(&self) -> anyhow::Result<JobRegistry> {
        Ok(catalog::job_registry(self.reconciler(), &self.config.scheduler)?)
    }

    pub fn scheduler(&self) -> anyhow::Result<Scheduler> {
        Ok(Scheduler::new(self.jobs()?, &self.config.scheduler, self.queue.clone())?)
    }

    pub fn handlers(&self) -> anyhow::Result<HandlerRegistry> {
        Ok(catalog::handler_registry(self.db.clone(), self.market.clone())?)
    }

    pub fn worker(&self) -> anyhow::Result<Worker> {
        Ok(Worker::new(self.queue.clone(), Arc::new(self.handlers()?))
            .with_poll_interval(self.poll_interval()))
    }

    pub fn monitor(&self) -> TaskMonitor {
        TaskMonitor::new(
            self.queue.clone(),
            self.poll_interval(),
            Duration::from_secs(self.config.queue.monitor_timeout_secs),
        )
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.queue.poll_interval_ms.max(1))
    }
}
