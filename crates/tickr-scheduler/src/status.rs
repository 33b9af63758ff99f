use std::sync::Arc;

use chrono::{DateTime, Utc};
use tickr_queue::SharedCache;
use tracing::warn;

use crate::error::Result;

pub const LAST_RUN_PREFIX: &str = "job:lastrun:";
pub const LAST_COMPLETION_PREFIX: &str = "job:lastcompletion:";

/// Operator-visible run timestamps, kept in the shared cache as RFC 3339
/// strings under `job:lastrun:<name>` / `job:lastcompletion:<name>`.
#[derive(Clone)]
pub struct JobStatusStore {
    cache: Arc<dyn SharedCache>,
}

impl JobStatusStore {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { cache }
    }

    pub async fn record_run(&self, job: &str, at: DateTime<Utc>) -> Result<()> {
        self.cache
            .set(&format!("{LAST_RUN_PREFIX}{job}"), &at.to_rfc3339())
            .await?;
        Ok(())
    }

    pub async fn record_completion(&self, job: &str, at: DateTime<Utc>) -> Result<()> {
        self.cache
            .set(&format!("{LAST_COMPLETION_PREFIX}{job}"), &at.to_rfc3339())
            .await?;
        Ok(())
    }

    pub async fn last_run(&self, job: &str) -> Result<Option<DateTime<Utc>>> {
        self.read(&format!("{LAST_RUN_PREFIX}{job}")).await
    }

    pub async fn last_completion(&self, job: &str) -> Result<Option<DateTime<Utc>>> {
        self.read(&format!("{LAST_COMPLETION_PREFIX}{job}")).await
    }

    async fn read(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!(%key, value = %raw, "unparseable job timestamp: {e}");
                Ok(None)
            }
        }
    }
}
