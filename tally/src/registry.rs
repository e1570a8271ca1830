//! Per unit of work counter buffer.
//!
//! A [`LocalCounters`] is created when a unit of work, e.g. one request,
//! begins and is passed to every call site that records counters. When the
//! work ends [`LocalCounters::save`] consumes it, flushing everything it holds
//! through a [`BatchWriter`] as one batch. There is no process-wide registry.

use tally_clock::Clock;
use tally_counter::Counter;
use tally_store::Queue;

use crate::writer::{self, BatchWriter};

/// Counters recorded during one unit of work.
#[derive(Debug, Default)]
pub struct LocalCounters {
    counters: Vec<Counter>,
}

impl LocalCounters {
    /// Create a new, empty [`LocalCounters`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `counters` to those pending.
    pub fn store<I>(&mut self, counters: I)
    where
        I: IntoIterator,
        I::Item: Into<Counter>,
    {
        self.counters.extend(counters.into_iter().map(Into::into));
    }

    /// The pending counters, in the order stored.
    #[must_use]
    pub fn get(&self) -> &[Counter] {
        &self.counters
    }

    /// Whether no counters are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Flush the pending counters through `writer`, ending this unit of work.
    /// Returns the serialized batch, or `None` if nothing was pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be serialized.
    ///
    /// # Panics
    ///
    /// Panics if any timing counter has an open measurement.
    pub async fn save<Q, C>(self, writer: &BatchWriter<Q, C>) -> Result<Option<String>, writer::Error>
    where
        Q: Queue,
        C: Clock,
    {
        if self.counters.is_empty() {
            return Ok(None);
        }
        writer.save(&self.counters, None).await.map(Some)
    }
}
