//! `tickr-scheduler`: daily market-boundary scheduler and job registry.
//!
//! # Overview
//!
//! Jobs are registered once in a [`JobRegistry`] with the times of day they
//! run at. The [`Scheduler`] wakes on a fixed tick, works out whether the
//! market-open or market-close boundary has just been crossed in its time
//! zone, and runs every job scheduled at that boundary, at most once per
//! boundary per day.
//!
//! # Boundaries
//!
//! | Boundary | Fires when                        | Re-arms the other |
//! |----------|-----------------------------------|-------------------|
//! | `open`   | `open <= now < close`, not fired  | `close`           |
//! | `close`  | `now >= close`, not fired         | `open`            |
//!
//! A job flagged `skip_weekends` is suppressed on Saturday and Sunday
//! regardless of boundary state. Jobs run inline on the scheduler task;
//! long work should be handed to the work queue.

pub mod engine;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod status;
pub mod types;

pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use registry::{Job, JobRegistry};
pub use schedule::BoundaryTracker;
pub use status::JobStatusStore;
pub use types::{Boundary, BoundaryState, JobContext, JobHandler, JobOutput, Trigger};
