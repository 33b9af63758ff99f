//! `tickr-queue`: task records and a FIFO work queue on a shared cache.
//!
//! # Protocol
//!
//! A producer calls [`TaskQueue::enqueue`], which writes a `queued` [`Task`]
//! record under the task's UUID and pushes a [`QueueEnvelope`] onto the
//! queue list in one atomic step. A [`Worker`] pops envelopes, moves the
//! task to `running`, executes the handler registered for `func`, appends
//! log lines as it goes and finishes the record as `completed` or `failed`.
//! Pollers only ever read task records.
//!
//! | Backend         | Enqueue                    | Pop                    |
//! |-----------------|----------------------------|------------------------|
//! | [`SqliteCache`] | one transaction            | `DELETE … RETURNING`   |
//! | [`RedisCache`]  | `MULTI` of `SET` + `LPUSH` | `RPOP`                 |

pub mod cache;
pub mod error;
pub mod handler;
pub mod queue;
pub mod redis_cache;
pub mod sqlite_cache;
pub mod types;
pub mod worker;

pub use cache::SharedCache;
pub use error::{QueueError, Result};
pub use handler::{HandlerRegistry, TaskContext, TaskHandler};
pub use queue::TaskQueue;
pub use redis_cache::RedisCache;
pub use sqlite_cache::SqliteCache;
pub use types::{LogLevel, QueueEnvelope, Task, TaskArgs, TaskId, TaskLog, TaskStatus};
pub use worker::Worker;
