//! Queued batches and permanent records.
//!
//! A [`Batch`] is what one unit of work hands to the queue: every counter it
//! touched, finalized, together with the window the work happened in. The
//! aggregator merges all batches of a window and appends one [`Entry`] per
//! counter to that counter's [`Record`] for the day.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    counter::{Aggregate, Counter},
    name::Name,
    value::Value,
};

/// A window's worth of finalized counter values from one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// The aggregation window these values belong to.
    pub window: i64,
    /// Finalized values by counter name.
    pub counters: BTreeMap<Name, Value>,
}

impl Batch {
    /// Finalize `counters` into a batch for `window`.
    ///
    /// A later counter with the same name as an earlier one replaces it.
    ///
    /// # Panics
    ///
    /// Panics if any timing counter has an open measurement.
    pub fn finalize<'a, I>(window: i64, counters: I) -> Self
    where
        I: IntoIterator<Item = &'a Counter>,
    {
        let counters = counters
            .into_iter()
            .map(|counter| (counter.name().clone(), counter.finalize()))
            .collect();
        Self { window, counters }
    }

    /// The queue tag shared by every batch of this window.
    #[must_use]
    pub fn tag(&self) -> String {
        tag(self.window)
    }
}

/// The queue tag for `window`.
#[must_use]
pub fn tag(window: i64) -> String {
    window.to_string()
}

/// One window's aggregate value in a [`Record`], `[window, value]` in JSON.
pub type Entry = (i64, Value);

/// The permanent, append-only history of one counter on one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Vec<Entry>);

impl Record {
    /// Append the aggregate value for `window`.
    pub fn push(&mut self, window: i64, value: Value) {
        self.0.push((window, value));
    }

    /// All entries in the order they were appended.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.0
    }

    /// Consume the record, returning its entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<Entry> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        counter::{Average, Sum},
        value::Mean,
    };

    #[test]
    fn batch_json_shape() {
        let mut views = Sum::new("page/view").expect("valid name");
        views.increment();
        let mut size = Average::new("page/size").expect("valid name");
        size.offset(3.0);
        let counters: Vec<Counter> = vec![views.into(), size.into()];

        let batch = Batch::finalize(1010, &counters);
        assert_eq!(batch.tag(), "1010");
        let json = serde_json::to_string(&batch).expect("serialize");
        assert_eq!(
            json,
            r#"{"window":1010,"counters":{"page/size":[3.0,1],"page/view":1}}"#
        );
        let parsed: Batch = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, batch);
    }

    #[test]
    fn later_duplicate_name_wins() {
        let mut first = Sum::new("page/view").expect("valid name");
        first.offset(1);
        let mut second = Sum::new("page/view").expect("valid name");
        second.offset(9);
        let counters: Vec<Counter> = vec![first.into(), second.into()];

        let batch = Batch::finalize(0, &counters);
        assert_eq!(batch.counters.len(), 1);
        let name = Name::new("page/view").expect("valid name");
        assert_eq!(batch.counters.get(&name), Some(&Value::Count(9)));
    }

    #[test]
    fn batch_with_invalid_name_does_not_parse() {
        assert!(serde_json::from_str::<Batch>(r#"{"window":0,"counters":{"a:b":1}}"#).is_err());
    }

    #[test]
    fn record_appends_in_order() {
        let mut record: Record = serde_json::from_str("[[1000,3]]").expect("deserialize");
        record.push(1010, Value::Weighted(Mean::Int(50), 2));
        assert_eq!(
            serde_json::to_string(&record).expect("serialize"),
            "[[1000,3],[1010,[50,2]]]"
        );
        assert_eq!(record.entries().len(), 2);
        assert_eq!(record.into_entries()[0], (1000, Value::Count(3)));
    }
}
