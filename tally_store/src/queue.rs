//! The durable pull queue contract
//!
//! Producers [`Queue::enqueue`] tasks carrying an opaque payload, a grouping
//! tag and a not-before time. Consumers lease visible tasks for a bounded
//! duration, during which no other consumer may lease them, and
//! [`Queue::delete`] them once their work is committed. A task whose lease
//! expires without being deleted becomes visible again. Delivery is therefore
//! at-least-once.

use std::{io, time::Duration};

use async_trait::async_trait;

mod fs;
mod memory;

pub use fs::FsQueue;
pub use memory::MemoryQueue;

/// Errors produced by [`Queue`] implementations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper around [`io::Error`].
    #[error("[{context}] Io error: {err}")]
    Io {
        /// The context for the error, simple tag
        context: &'static str,
        /// The underlying error
        err: io::Error,
    },
    /// Wrapper around [`serde_json::Error`].
    #[error("Json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A task id that cannot name a queue entry.
    #[error("Invalid task id: {0}")]
    InvalidId(String),
    /// The backing service refused the request.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// A task to be added to a [`Queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Opaque payload.
    pub payload: String,
    /// Grouping key, see [`Queue::lease_by_tag`].
    pub tag: String,
    /// Unix second before which the task may not be leased.
    pub not_before: i64,
}

/// A task leased from a [`Queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Identifier assigned by the queue on enqueue.
    pub id: String,
    /// Opaque payload.
    pub payload: String,
    /// Grouping key.
    pub tag: String,
}

#[async_trait]
/// An at-least-once pull queue.
pub trait Queue: Send + Sync {
    /// Add a task to the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the task could not be durably recorded.
    async fn enqueue(&self, task: NewTask) -> Result<(), Error>;

    /// Lease up to `max_tasks` visible tasks for `lease`, oldest not-before
    /// first. Returns an empty vector if nothing is visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing service fails.
    async fn lease(&self, max_tasks: usize, lease: Duration) -> Result<Vec<Task>, Error>;

    /// As [`Queue::lease`], restricted to tasks tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing service fails.
    async fn lease_by_tag(
        &self,
        tag: &str,
        max_tasks: usize,
        lease: Duration,
    ) -> Result<Vec<Task>, Error>;

    /// Permanently remove `tasks`. Removing an already removed task is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing service fails.
    async fn delete(&self, tasks: &[Task]) -> Result<(), Error>;
}

/// Whether a task is leasable at `now`.
fn visible(not_before: i64, leased_until: Option<f64>, now: f64) -> bool {
    #[allow(clippy::cast_precision_loss)]
    let not_before = not_before as f64;
    now >= not_before && leased_until.is_none_or(|until| now >= until)
}
