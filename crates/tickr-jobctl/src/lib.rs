//! `tickr-jobctl`: the default job catalog and the operator commands behind
//! the `jobctl` binary.

pub mod app;
pub mod catalog;
pub mod commands;
pub mod jobs;
pub mod monitor;

pub use app::App;
pub use monitor::{MonitorReport, TaskMonitor};
