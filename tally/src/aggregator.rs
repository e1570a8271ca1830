//! Merge queued batches into permanent records.
//!
//! One aggregation cycle, [`Aggregator::process_next_window`]:
//!
//! 1. Reset every registered counter.
//! 2. Lease a single visible batch. If there is none no window has matured
//!    and the cycle ends.
//! 3. Lease every other visible batch sharing its tag, that is its window,
//!    up to the configured maximum. The tag names the window; a batch
//!    claiming any other window is logged and skipped.
//! 4. Merge each batch's values into the registered counter of the same
//!    name. Values for unregistered counters, or of the wrong shape, are
//!    logged and skipped, as are payloads that are not batches at all.
//! 5. Finalize the counters that received a value and append each to its
//!    per-day [`Record`] in the store.
//! 6. Delete the leased batches.
//!
//! Deletion is the commit point. A failure before it leaves the batches
//! leased; once the lease expires any aggregator may process them again.
//! Permanent records may therefore hold more than one entry for a window.
//! Consumers must tolerate this, which they already do for the partial
//! windows produced when a window holds more than the maximum batches.

use std::{collections::BTreeMap, num::NonZeroU32, time::Duration};

use metrics::counter;
use rustc_hash::{FxHashMap, FxHashSet};
use tally_clock::{Backoff, Clock, RealClock, backoff};
use tally_counter::{
    Aggregate, Counter, DEFAULT_WINDOW_SIZE, Name, Value,
    batch::{Batch, Record},
};
use tally_store::{Meta, Queue, Store, Task, queue, store};
use tracing::{debug, info, warn};

use crate::path::{date_of, record_path};

/// The polling deadline used in development mode.
pub const DEVELOPMENT_RUNTIME: Duration = Duration::from_secs(5);

/// Errors produced by [`Aggregator`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Two registered counters share a name.
    #[error("Duplicate counter name registered: {0}")]
    DuplicateCounter(Name),
    /// The queue failed.
    #[error("Queue error: {0}")]
    Queue(#[from] queue::Error),
    /// The store failed.
    #[error("Store error: {0}")]
    Store(#[from] store::Error),
    /// A stored record could not be read or written.
    #[error("Json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A window outside the representable calendar.
    #[error("Window {0} has no calendar date")]
    Date(i64),
    /// The backoff could not be constructed.
    #[error("Backoff error: {0}")]
    Backoff(#[from] backoff::Error),
}

/// Tunables of an [`Aggregator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// The aggregation window size. Also the maximum polling backoff.
    pub window_size: NonZeroU32,
    /// How long a cycle holds its batches.
    pub lease: Duration,
    /// The most batches leased for one window per cycle.
    pub lease_max_tasks: usize,
    /// Store directory under which permanent records are kept.
    pub base_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            lease: Duration::from_secs(480),
            lease_max_tasks: 1_000,
            base_dir: "/_tally/stats/counters".to_string(),
        }
    }
}

/// The outcome of an aggregation cycle that found a matured window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult {
    /// The window merged.
    pub window: i64,
    /// Finalized values of every counter that received data.
    pub counters: BTreeMap<Name, Value>,
}

/// Consumes matured batches from `Q` and appends them to records in `S`.
#[derive(Debug)]
pub struct Aggregator<Q, S, C = RealClock> {
    queue: Q,
    store: S,
    clock: C,
    counters: Vec<Counter>,
    index: FxHashMap<Name, usize>,
    settings: Settings,
}

impl<Q, S, C> Aggregator<Q, S, C>
where
    Q: Queue,
    S: Store,
    C: Clock,
{
    /// Create a new [`Aggregator`] merging into `counters`.
    ///
    /// # Errors
    ///
    /// Returns an error if two counters share a name.
    pub fn new(
        queue: Q,
        store: S,
        clock: C,
        counters: Vec<Counter>,
        settings: Settings,
    ) -> Result<Self, Error> {
        let mut index = FxHashMap::default();
        for (idx, counter) in counters.iter().enumerate() {
            if index.insert(counter.name().clone(), idx).is_some() {
                return Err(Error::DuplicateCounter(counter.name().clone()));
            }
        }
        Ok(Self {
            queue,
            store,
            clock,
            counters,
            index,
            settings,
        })
    }

    /// Run one aggregation cycle. Returns `None` if no window has matured.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue or store fails. Batches leased by a
    /// failed cycle are not deleted.
    pub async fn process_next_window(&mut self) -> Result<Option<WindowResult>, Error> {
        for counter in &mut self.counters {
            *counter = counter.fresh();
        }

        let mut tasks = self.queue.lease(1, self.settings.lease).await?;
        let Some(tag) = tasks.first().map(|task| task.tag.clone()) else {
            debug!("No matured window");
            return Ok(None);
        };
        tasks.extend(
            self.queue
                .lease_by_tag(&tag, self.settings.lease_max_tasks, self.settings.lease)
                .await?,
        );
        debug!(tag = %tag, items = tasks.len(), "Leased window");

        let batches = parse_batches(&tasks);
        let Some(window) = tag
            .parse()
            .ok()
            .or_else(|| batches.first().map(|batch| batch.window))
        else {
            warn!(tag = %tag, items = tasks.len(), "Discarding window with no readable batch");
            self.queue.delete(&tasks).await?;
            return Ok(None);
        };

        let counters = self.merge(window, &batches);
        self.persist(window, &counters).await?;
        self.queue.delete(&tasks).await?;

        counter!("tally_aggregator_windows_processed").increment(1);
        counter!("tally_aggregator_items_consumed").increment(tasks.len() as u64);
        info!(
            window,
            items = tasks.len(),
            counters = counters.len(),
            "Processed window"
        );
        Ok(Some(WindowResult { window, counters }))
    }

    /// Repeatedly run [`Aggregator::process_next_window`] until `total_runtime`
    /// has elapsed, or [`DEVELOPMENT_RUNTIME`] if `development` is set.
    ///
    /// After a cycle that finds no window the loop waits, one second at first
    /// and doubling with each further empty cycle up to the window size. A
    /// cycle that finds a window resets the wait. The loop ends when the next
    /// wait would cross the deadline, or after a busy cycle that ends past it.
    /// Returns every cycle's result in order.
    ///
    /// # Errors
    ///
    /// Returns the first error of any cycle.
    pub async fn process_windows_with_backoff(
        &mut self,
        total_runtime: Duration,
        development: bool,
    ) -> Result<Vec<Option<WindowResult>>, Error> {
        let runtime = if development {
            DEVELOPMENT_RUNTIME
        } else {
            total_runtime
        };
        let deadline = self.clock.now() + runtime.as_secs_f64();
        let mut backoff = Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(u64::from(self.settings.window_size.get())),
        )?;

        let mut results = Vec::new();
        loop {
            let result = self.process_next_window().await?;
            let found = result.is_some();
            results.push(result);

            if found {
                backoff.reset();
                if self.clock.now() >= deadline {
                    break;
                }
                continue;
            }

            let delay = backoff.delay();
            if self.clock.now() + delay.as_secs_f64() > deadline {
                break;
            }
            debug!(delay_secs = delay.as_secs(), "Backing off");
            counter!("tally_aggregator_backoff_waits").increment(1);
            self.clock.wait(delay).await;
            backoff.advance();
        }
        Ok(results)
    }

    fn merge(&mut self, window: i64, batches: &[Batch]) -> BTreeMap<Name, Value> {
        let mut touched = FxHashSet::default();
        for batch in batches {
            if batch.window != window {
                warn!(window, batch_window = batch.window, "Skipping batch of another window");
                counter!("tally_aggregator_unreadable_batches").increment(1);
                continue;
            }
            for (name, value) in &batch.counters {
                let Some(&idx) = self.index.get(name) else {
                    warn!(window, %name, "Skipping value for unregistered counter");
                    counter!("tally_aggregator_unknown_counters").increment(1);
                    continue;
                };
                if let Err(err) = self.counters[idx].aggregate(*value) {
                    warn!(window, "Skipping value: {err}");
                    counter!("tally_aggregator_mismatched_values").increment(1);
                    continue;
                }
                touched.insert(idx);
            }
        }
        touched
            .into_iter()
            .map(|idx| {
                let counter = &self.counters[idx];
                (counter.name().clone(), counter.finalize())
            })
            .collect()
    }

    async fn persist(&self, window: i64, counters: &BTreeMap<Name, Value>) -> Result<(), Error> {
        if counters.is_empty() {
            return Ok(());
        }
        let date = date_of(window).ok_or(Error::Date(window))?;
        for (name, value) in counters {
            let path = record_path(&self.settings.base_dir, date, name, self.settings.window_size);
            let mut record: Record = match self.store.get(&path).await? {
                Some(content) => serde_json::from_str(&content)?,
                None => Record::default(),
            };
            record.push(window, *value);
            let meta = Meta {
                counter_name: name.to_string(),
                date,
            };
            self.store
                .write(&path, serde_json::to_string(&record)?, meta)
                .await?;
        }
        Ok(())
    }
}

fn parse_batches(tasks: &[Task]) -> Vec<Batch> {
    tasks
        .iter()
        .filter_map(|task| match serde_json::from_str(&task.payload) {
            Ok(batch) => Some(batch),
            Err(err) => {
                warn!(tag = %task.tag, id = %task.id, "Skipping unreadable batch: {err}");
                counter!("tally_aggregator_unreadable_batches").increment(1);
                None
            }
        })
        .collect()
}
