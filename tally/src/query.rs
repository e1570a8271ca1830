//! Read permanent records back.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tally_clock::{Clock, RealClock};
use tally_counter::batch::{Entry, Record};
use tally_store::{Filter, Store, store};
use tracing::debug;

/// Errors produced by [`CountersService`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The end of the requested range precedes its start.
    #[error("End date {end} is before start date {start}")]
    InvalidRange {
        /// Requested first day
        start: NaiveDate,
        /// Requested last day
        end: NaiveDate,
    },
    /// The clock reads a time outside the representable calendar.
    #[error("The current time has no calendar date")]
    Clock,
    /// The store failed.
    #[error("Store error: {0}")]
    Store(#[from] store::Error),
    /// A stored record is not valid JSON.
    #[error("Json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads counter records from a [`Store`].
#[derive(Debug)]
pub struct CountersService<S, C = RealClock> {
    store: S,
    clock: C,
    base_dir: String,
}

impl<S> CountersService<S, RealClock>
where
    S: Store,
{
    /// Create a new [`CountersService`] reading records below `base_dir`.
    #[must_use]
    pub fn new(store: S, base_dir: String) -> Self {
        Self::with_clock(store, RealClock, base_dir)
    }
}

impl<S, C> CountersService<S, C>
where
    S: Store,
    C: Clock,
{
    /// Create a new [`CountersService`] whose default dates come from `clock`.
    #[must_use]
    pub fn with_clock(store: S, clock: C, base_dir: String) -> Self {
        Self {
            store,
            clock,
            base_dir,
        }
    }

    /// Every `[window, value]` entry recorded for `names` between `start` and
    /// `end` inclusive. Both dates default to the current UTC day.
    ///
    /// Entries of a name are ordered by day, then as appended. Names without
    /// any entry in the range are absent from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if `end` precedes `start` or the store fails.
    pub async fn get_counter_data<I>(
        &self,
        names: I,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<BTreeMap<String, Vec<Entry>>, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            (start, end) => {
                let today = self.today()?;
                (start.unwrap_or(today), end.unwrap_or(today))
            }
        };
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }

        let names: BTreeSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        let mut data = BTreeMap::new();
        for name in names {
            let filter = Filter {
                counter_name: Some(name.clone()),
                start: Some(start),
                end: Some(end),
            };
            let mut files = self.store.list_files(&self.base_dir, true, &filter).await?;
            files.sort_by_key(|file| file.meta.date);

            let mut entries = Vec::new();
            for file in files {
                let record: Record = serde_json::from_str(&file.content)?;
                entries.extend(record.into_entries());
            }
            debug!(counter = %name, entries = entries.len(), "Queried counter");
            if !entries.is_empty() {
                data.insert(name, entries);
            }
        }
        Ok(data)
    }

    fn today(&self) -> Result<NaiveDate, Error> {
        #[allow(clippy::cast_possible_truncation)]
        let now = self.clock.now().floor() as i64;
        crate::path::date_of(now).ok_or(Error::Clock)
    }
}
