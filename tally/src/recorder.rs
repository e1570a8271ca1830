//! Invocation and latency counters for named operations.
//!
//! Every operation `op` is tracked by two counters: a [`Sum`] named `op`
//! counting invocations and an [`AverageTiming`] named `op/latency`. An
//! [`OperationRecorder`] owns both for the duration of one invocation and
//! hands them to the unit of work's [`LocalCounters`] when the invocation
//! finishes, successfully or not.
//!
//! ```text
//! let mut recorder = OperationRecorder::new("files/get")?;
//! recorder.begin();
//! let result = get_file(path);
//! recorder.finish(&mut scope);
//! ```

use tally_counter::{AverageTiming, Counter, Sum, name};

use crate::registry::LocalCounters;

const LATENCY_SUFFIX: &str = "latency";

/// Counts and times one invocation of an operation.
#[derive(Debug)]
pub struct OperationRecorder {
    invocations: Sum,
    latency: AverageTiming,
}

impl OperationRecorder {
    /// Create the counters for operation `op`.
    ///
    /// # Errors
    ///
    /// Returns an error if `op` is not a valid counter name.
    pub fn new(op: &str) -> Result<Self, name::Error> {
        Ok(Self {
            invocations: Sum::new(op)?,
            latency: AverageTiming::new(format!("{op}/{LATENCY_SUFFIX}"))?,
        })
    }

    /// Count the invocation and start timing it.
    ///
    /// # Panics
    ///
    /// Panics if the invocation has already begun.
    pub fn begin(&mut self) {
        self.invocations.increment();
        self.latency.start();
    }

    /// Stop timing and store both counters in `scope`.
    ///
    /// # Panics
    ///
    /// Panics if [`OperationRecorder::begin`] was not called.
    pub fn finish(mut self, scope: &mut LocalCounters) {
        self.latency.stop();
        scope.store([Counter::from(self.invocations), Counter::from(self.latency)]);
    }

    /// Run `f` as one invocation, storing the counters in `scope` afterward.
    pub fn record<T, F>(mut self, scope: &mut LocalCounters, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.begin();
        let output = f();
        self.finish(scope);
        output
    }
}

/// The counters an aggregator needs to merge batches produced by
/// [`OperationRecorder`] for each of `ops`.
///
/// # Errors
///
/// Returns an error if any op is not a valid counter name.
pub fn operation_counters<I>(ops: I) -> Result<Vec<Counter>, name::Error>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut counters = Vec::new();
    for op in ops {
        let op = op.as_ref();
        counters.push(Sum::new(op)?.into());
        counters.push(AverageTiming::new(format!("{op}/{LATENCY_SUFFIX}"))?.into());
    }
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_counter::{Aggregate, Kind, Mean, Value};

    #[test]
    fn record_stores_both_counters() {
        let mut scope = LocalCounters::new();
        let out = OperationRecorder::new("files/get")
            .expect("valid name")
            .record(&mut scope, || 7);
        assert_eq!(out, 7);

        let stored = scope.get();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].name().as_str(), "files/get");
        assert_eq!(stored[0].finalize(), Value::Count(1));
        assert_eq!(stored[1].name().as_str(), "files/get/latency");
        assert!(matches!(stored[1].finalize(), Value::Weighted(Mean::Int(_), 1)));
    }

    #[test]
    fn finish_on_error_path() {
        let mut scope = LocalCounters::new();
        let mut recorder = OperationRecorder::new("files/delete").expect("valid name");
        recorder.begin();
        let result: Result<(), &str> = Err("missing");
        recorder.finish(&mut scope);
        assert!(result.is_err());
        assert_eq!(scope.get().len(), 2);
    }

    #[test]
    #[should_panic(expected = "stopped without starting")]
    fn finish_without_begin_panics() {
        let mut scope = LocalCounters::new();
        OperationRecorder::new("files/get")
            .expect("valid name")
            .finish(&mut scope);
    }

    #[test]
    fn rejects_invalid_ops() {
        assert!(OperationRecorder::new("files:get").is_err());
        assert!(operation_counters(["ok", "/bad"]).is_err());
    }

    #[test]
    fn operation_counters_pair_sum_and_timing() {
        let counters = operation_counters(["files/get", "files/list"]).expect("valid names");
        let described: Vec<(&str, Kind)> = counters
            .iter()
            .map(|c| (c.name().as_str(), c.kind()))
            .collect();
        assert_eq!(
            described,
            vec![
                ("files/get", Kind::Sum),
                ("files/get/latency", Kind::AverageTiming),
                ("files/list", Kind::Sum),
                ("files/list/latency", Kind::AverageTiming),
            ]
        );
    }
}
