//! Shared building blocks for the tickr job system: layered configuration,
//! the top-level error type and small calendar types used by every crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::TickrConfig;
pub use error::{CoreError, Result};
pub use types::TimeOfDay;
