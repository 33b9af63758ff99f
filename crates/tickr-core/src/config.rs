use chrono::NaiveDate;
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::{parse_timezone, TimeOfDay};

pub const DEFAULT_QUEUE_KEY: &str = "queue";
pub const DEFAULT_TIMEZONE: &str = "America/New_York";
pub const DEFAULT_TICK_SECS: u64 = 60; // boundary check cadence
pub const DEFAULT_MONITOR_TIMEOUT_SECS: u64 = 300; // jobctl gives up after 5 minutes
pub const DEFAULT_LEASE_SECS: u64 = 900;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Top-level config (tickr.toml + TICKR_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickrConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub sec: SecConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where the queue and task records live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Tables inside `cache.sqlite_path`; fine for a single host.
    #[default]
    Sqlite,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// SQLite file for the `sqlite` backend, separate from `database.path`.
    #[serde(default = "default_cache_path")]
    pub sqlite_path: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_queue_key")]
    pub queue_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            sqlite_path: default_cache_path(),
            redis_url: default_redis_url(),
            queue_key: default_queue_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone every boundary and weekend check is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_market_open")]
    pub market_open: TimeOfDay,
    #[serde(default = "default_market_close")]
    pub market_close: TimeOfDay,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl SchedulerConfig {
    pub fn tz(&self) -> crate::error::Result<Tz> {
        parse_timezone(&self.timezone)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            market_open: default_market_open(),
            market_close: default_market_close(),
            tick_secs: DEFAULT_TICK_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a running task may go without a log append before pollers
    /// report it as stale.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_monitor_timeout_secs")]
    pub monitor_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_secs: DEFAULT_LEASE_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            monitor_timeout_secs: DEFAULT_MONITOR_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// First date the securities table is expected to cover.
    #[serde(default = "default_coverage_start")]
    pub coverage_start: NaiveDate,
    /// Always walk from `coverage_start`, ignoring the table's latest `min_date`.
    #[serde(default)]
    pub test_mode: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            coverage_start: default_coverage_start(),
            test_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_market_data_url")]
    pub base_url: String,
    /// Falls back to the POLYGON_API_KEY env var when unset.
    pub api_key: Option<String>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_data_url(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecConfig {
    #[serde(default = "default_sec_url")]
    pub base_url: String,
    /// SEC requires a contact string in the User-Agent header.
    #[serde(default = "default_sec_user_agent")]
    pub user_agent: String,
}

impl Default for SecConfig {
    fn default() -> Self {
        Self {
            base_url: default_sec_url(),
            user_agent: default_sec_user_agent(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickr/tickr.db", home)
}
fn default_cache_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickr/cache.db", home)
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_queue_key() -> String {
    DEFAULT_QUEUE_KEY.to_string()
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_market_open() -> TimeOfDay {
    TimeOfDay { hour: 9, minute: 30 }
}
fn default_market_close() -> TimeOfDay {
    TimeOfDay { hour: 16, minute: 0 }
}
fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_lease_secs() -> u64 {
    DEFAULT_LEASE_SECS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_monitor_timeout_secs() -> u64 {
    DEFAULT_MONITOR_TIMEOUT_SECS
}
fn default_coverage_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2003, 9, 10).unwrap_or(NaiveDate::MIN)
}
fn default_market_data_url() -> String {
    "https://api.polygon.io".to_string()
}
fn default_sec_url() -> String {
    "https://www.sec.gov".to_string()
}
fn default_sec_user_agent() -> String {
    "tickr-jobctl admin@example.com".to_string()
}

impl TickrConfig {
    /// Load config from a TOML file with TICKR_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. TICKR_CONFIG env var
    ///   3. ~/.tickr/tickr.toml
    ///
    /// Nested keys use a double underscore: `TICKR_SCHEDULER__TIMEZONE`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("TICKR_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: TickrConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TICKR_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, deep inside a job.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.scheduler.tz()?;
        if self.scheduler.market_open >= self.scheduler.market_close {
            return Err(crate::error::CoreError::Config(format!(
                "market_open ({}) must be before market_close ({})",
                self.scheduler.market_open, self.scheduler.market_close
            )));
        }
        if self.scheduler.tick_secs == 0 {
            return Err(crate::error::CoreError::Config(
                "scheduler.tick_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickr/tickr.toml", home)
}
