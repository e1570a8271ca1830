//! Hand finalized counters to the durable queue.
//!
//! [`BatchWriter::save`] finalizes a set of counters into a
//! [`tally_counter::batch::Batch`] for the window the current time falls in,
//! tags it with that window and holds it back from consumers until the window
//! has closed and a further lease buffer has passed. Stats collection is best
//! effort: a queue that refuses the batch is logged and counted, never
//! reported to the caller.

use std::{num::NonZeroU32, time::Duration};

use metrics::counter;
use tally_clock::{Clock, RealClock};
use tally_counter::{Counter, batch::Batch, window, window_end};
use tally_store::{NewTask, Queue};
use tracing::{debug, error};

/// Errors produced by [`BatchWriter`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// There was nothing to save.
    #[error("Cannot save an empty set of counters")]
    NoCounters,
    /// Wrapper around [`serde_json::Error`].
    #[error("Json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Finalizes counters and enqueues them as one batch.
#[derive(Debug)]
pub struct BatchWriter<Q, C = RealClock> {
    queue: Q,
    clock: C,
    window_size: NonZeroU32,
    lease_buffer: Duration,
}

impl<Q> BatchWriter<Q, RealClock>
where
    Q: Queue,
{
    /// Create a new [`BatchWriter`] on real-clock time.
    #[must_use]
    pub fn new(queue: Q, window_size: NonZeroU32, lease_buffer: Duration) -> Self {
        Self::with_clock(queue, RealClock, window_size, lease_buffer)
    }
}

impl<Q, C> BatchWriter<Q, C>
where
    Q: Queue,
    C: Clock,
{
    /// Create a new [`BatchWriter`] reading time from `clock`.
    #[must_use]
    pub fn with_clock(queue: Q, clock: C, window_size: NonZeroU32, lease_buffer: Duration) -> Self {
        Self {
            queue,
            clock,
            window_size,
            lease_buffer,
        }
    }

    /// Finalize `counters` and enqueue them as one batch for the window
    /// containing `timestamp`, or now if `None`. Returns the serialized batch.
    ///
    /// # Errors
    ///
    /// Returns an error if `counters` is empty or the batch cannot be
    /// serialized. A failure to enqueue is not an error.
    ///
    /// # Panics
    ///
    /// Panics if any timing counter has an open measurement.
    pub async fn save(&self, counters: &[Counter], timestamp: Option<f64>) -> Result<String, Error> {
        if counters.is_empty() {
            return Err(Error::NoCounters);
        }
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let window = window(timestamp, self.window_size);
        let batch = Batch::finalize(window, counters);
        let payload = serde_json::to_string(&batch)?;

        let task = NewTask {
            payload: payload.clone(),
            tag: batch.tag(),
            not_before: not_before(window, self.window_size, self.lease_buffer),
        };
        match self.queue.enqueue(task).await {
            Ok(()) => {
                debug!(window, counters = batch.counters.len(), "Enqueued counter batch");
                counter!("tally_writer_batches_enqueued").increment(1);
            }
            Err(err) => {
                error!(window, "Failed to enqueue counter batch: {err}");
                counter!("tally_writer_enqueue_failures").increment(1);
            }
        }
        Ok(payload)
    }
}

/// The unix second from which a batch of `window` may be leased.
fn not_before(window: i64, size: NonZeroU32, lease_buffer: Duration) -> i64 {
    let buffer = i64::try_from(lease_buffer.as_secs()).unwrap_or(i64::MAX);
    window_end(window, size).saturating_add(buffer)
}
