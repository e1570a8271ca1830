//! The counter hierarchy
//!
//! Three kinds of counter share the [`Aggregate`] contract:
//!
//! * [`Sum`] keeps a running integer total.
//! * [`Average`] keeps a cumulative moving average and its weight. Merging
//!   `(v, w)` into `(value, weight)` yields
//!   `((value * weight) + (v * w)) / (weight + w)` with weight `weight + w`.
//! * [`AverageTiming`] is an [`Average`] of elapsed milliseconds with
//!   start/stop convenience. It finalizes to integer milliseconds.
//!
//! `aggregate` merges raw or partially aggregated data, `finalize` produces
//! the value to persist. `finalize` borrows immutably and so returns the same
//! value no matter how often it is called.
//!
//! An [`Average`] only ever holds a finite mean. Observations that are not
//! finite, or that would push the mean out of range, are logged and dropped.
//!
//! Misuse of a timer is a programming error and panics.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    name::{self, Name},
    value::{Mean, Value},
};

/// Errors produced by [`Aggregate::aggregate`]
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The value has the wrong shape for the counter kind.
    #[error("Counter {name} of kind {kind:?} cannot aggregate {value:?}")]
    Mismatch {
        /// Name of the counter
        name: Name,
        /// Kind of the counter
        kind: Kind,
        /// The rejected value
        value: Value,
    },
}

/// Shared capability of every counter.
pub trait Aggregate {
    /// Merge `value` into the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` does not have the shape this counter
    /// produces from `finalize`.
    fn aggregate(&mut self, value: Value) -> Result<(), Error>;

    /// The value to persist.
    fn finalize(&self) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The kinds of [`Counter`].
pub enum Kind {
    /// See [`Sum`]
    Sum,
    /// See [`Average`]
    Average,
    /// See [`AverageTiming`]
    AverageTiming,
}

/// The simplest of counters, offsets to a single integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sum {
    name: Name,
    value: i64,
}

impl Sum {
    /// Create a new, zeroed [`Sum`]
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a valid counter name.
    pub fn new<S>(name: S) -> Result<Self, name::Error>
    where
        S: Into<String>,
    {
        Ok(Self::with_name(Name::new(name)?))
    }

    /// Create a new, zeroed [`Sum`] from an already validated name.
    #[must_use]
    pub fn with_name(name: Name) -> Self {
        Self { name, value: 0 }
    }

    /// The name of this counter.
    #[must_use]
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Increment the counter by one.
    pub fn increment(&mut self) {
        self.offset(1);
    }

    /// Offset the counter by some value.
    pub fn offset(&mut self, value: i64) {
        self.value = self.value.saturating_add(value);
    }
}

impl Aggregate for Sum {
    fn aggregate(&mut self, value: Value) -> Result<(), Error> {
        match value {
            Value::Count(v) => {
                self.offset(v);
                Ok(())
            }
            Value::Weighted(..) => Err(Error::Mismatch {
                name: self.name.clone(),
                kind: Kind::Sum,
                value,
            }),
        }
    }

    fn finalize(&self) -> Value {
        Value::Count(self.value)
    }
}

/// A cumulative moving average counter.
///
/// Each finalized value represents the average during one aggregation
/// window; averages are not affected by values from other windows.
#[derive(Debug, Clone, PartialEq)]
pub struct Average {
    name: Name,
    value: f64,
    weight: u64,
}

impl Average {
    /// Create a new, empty [`Average`]
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a valid counter name.
    pub fn new<S>(name: S) -> Result<Self, name::Error>
    where
        S: Into<String>,
    {
        Ok(Self::with_name(Name::new(name)?))
    }

    /// Create a new, empty [`Average`] from an already validated name.
    #[must_use]
    pub fn with_name(name: Name) -> Self {
        Self {
            name,
            value: 0.0,
            weight: 0,
        }
    }

    /// The name of this counter.
    #[must_use]
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Record an observation of `1`.
    pub fn increment(&mut self) {
        self.merge(1.0, 1);
    }

    /// Record a single observation of `value`.
    pub fn offset(&mut self, value: f64) {
        self.merge(value, 1);
    }

    /// Merge `weight` observations averaging `value`. A non-finite value, or
    /// a merge whose result would not be finite, is dropped: JSON cannot
    /// carry it.
    #[allow(clippy::cast_precision_loss)]
    fn merge(&mut self, value: f64, weight: u64) {
        let total = self.weight.saturating_add(weight);
        if total == 0 {
            return;
        }
        if !value.is_finite() {
            warn!(counter = %self.name, value, "Dropping non-finite observation");
            return;
        }
        let numerator = self.value * self.weight as f64 + value * weight as f64;
        let merged = numerator / total as f64;
        if !merged.is_finite() {
            warn!(
                counter = %self.name,
                value,
                weight,
                "Dropping observation that overflows the average"
            );
            return;
        }
        self.value = merged;
        self.weight = total;
    }
}

impl Aggregate for Average {
    fn aggregate(&mut self, value: Value) -> Result<(), Error> {
        match value {
            Value::Weighted(mean, weight) => {
                self.merge(mean.as_f64(), weight);
                Ok(())
            }
            Value::Count(_) => Err(Error::Mismatch {
                name: self.name.clone(),
                kind: Kind::Average,
                value,
            }),
        }
    }

    fn finalize(&self) -> Value {
        Value::Weighted(Mean::Float(self.value), self.weight)
    }
}

/// An [`Average`] of elapsed milliseconds.
///
/// ```text
/// let mut latency = AverageTiming::new("page/render/latency")?;
/// latency.start();
/// // ...page render logic...
/// latency.stop();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AverageTiming {
    average: Average,
    started: Option<Instant>,
}

impl AverageTiming {
    /// Create a new, empty [`AverageTiming`]
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a valid counter name.
    pub fn new<S>(name: S) -> Result<Self, name::Error>
    where
        S: Into<String>,
    {
        Ok(Self::with_name(Name::new(name)?))
    }

    /// Create a new, empty [`AverageTiming`] from an already validated name.
    #[must_use]
    pub fn with_name(name: Name) -> Self {
        Self {
            average: Average::with_name(name),
            started: None,
        }
    }

    /// The name of this counter.
    #[must_use]
    pub fn name(&self) -> &Name {
        self.average.name()
    }

    /// Whether a measurement is open.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Open a measurement.
    ///
    /// # Panics
    ///
    /// Panics if a measurement is already open.
    pub fn start(&mut self) {
        assert!(
            self.started.is_none(),
            "Counter {} started again without stopping.",
            self.name()
        );
        self.started = Some(Instant::now());
    }

    /// Close the open measurement, recording the elapsed milliseconds.
    ///
    /// # Panics
    ///
    /// Panics if no measurement is open.
    pub fn stop(&mut self) {
        let Some(started) = self.started.take() else {
            panic!("Counter {} stopped without starting.", self.name());
        };
        self.record(started.elapsed());
    }

    /// Record a measurement taken elsewhere.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.average.offset(millis as f64);
    }
}

impl Aggregate for AverageTiming {
    fn aggregate(&mut self, value: Value) -> Result<(), Error> {
        self.average.aggregate(value).map_err(|err| match err {
            Error::Mismatch { name, value, .. } => Error::Mismatch {
                name,
                kind: Kind::AverageTiming,
                value,
            },
        })
    }

    /// # Panics
    ///
    /// Panics if a measurement is open.
    #[allow(clippy::cast_possible_truncation)]
    fn finalize(&self) -> Value {
        assert!(
            self.started.is_none(),
            "Counter {} finalized without stopping.",
            self.name()
        );
        Value::Weighted(
            Mean::Int(self.average.value.trunc() as i64),
            self.average.weight,
        )
    }
}

/// Any one of the counter kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Counter {
    /// A [`Sum`]
    Sum(Sum),
    /// An [`Average`]
    Average(Average),
    /// An [`AverageTiming`]
    AverageTiming(AverageTiming),
}

impl Counter {
    /// Create a new, empty counter of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a valid counter name.
    pub fn new<S>(kind: Kind, name: S) -> Result<Self, name::Error>
    where
        S: Into<String>,
    {
        Ok(Self::with_name(kind, Name::new(name)?))
    }

    /// Create a new, empty counter of `kind` from an already validated name.
    #[must_use]
    pub fn with_name(kind: Kind, name: Name) -> Self {
        match kind {
            Kind::Sum => Counter::Sum(Sum::with_name(name)),
            Kind::Average => Counter::Average(Average::with_name(name)),
            Kind::AverageTiming => Counter::AverageTiming(AverageTiming::with_name(name)),
        }
    }

    /// A new, empty counter with the same name and kind as this one.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Self::with_name(self.kind(), self.name().clone())
    }

    /// The name of this counter.
    #[must_use]
    pub fn name(&self) -> &Name {
        match self {
            Counter::Sum(c) => c.name(),
            Counter::Average(c) => c.name(),
            Counter::AverageTiming(c) => c.name(),
        }
    }

    /// The kind of this counter.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Counter::Sum(_) => Kind::Sum,
            Counter::Average(_) => Kind::Average,
            Counter::AverageTiming(_) => Kind::AverageTiming,
        }
    }
}

impl Aggregate for Counter {
    fn aggregate(&mut self, value: Value) -> Result<(), Error> {
        match self {
            Counter::Sum(c) => c.aggregate(value),
            Counter::Average(c) => c.aggregate(value),
            Counter::AverageTiming(c) => c.aggregate(value),
        }
    }

    fn finalize(&self) -> Value {
        match self {
            Counter::Sum(c) => c.finalize(),
            Counter::Average(c) => c.finalize(),
            Counter::AverageTiming(c) => c.finalize(),
        }
    }
}

impl From<Sum> for Counter {
    fn from(value: Sum) -> Self {
        Counter::Sum(value)
    }
}

impl From<Average> for Counter {
    fn from(value: Average) -> Self {
        Counter::Average(value)
    }
}

impl From<AverageTiming> for Counter {
    fn from(value: AverageTiming) -> Self {
        Counter::AverageTiming(value)
    }
}
