//! Counters, aggregation windows and wire schemas for tally
//!
//! Application code records observations into the counters of this crate,
//! finalizes them into a [`batch::Batch`] keyed by aggregation window and
//! hands that batch off for durable storage. The aggregator merges batches
//! of the same window back into fresh counters through the same
//! [`Aggregate`] contract and appends the result to a [`batch::Record`].

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::perf)]
#![deny(clippy::suspicious)]
#![deny(clippy::complexity)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![allow(clippy::multiple_crate_versions)]

pub mod batch;
pub mod counter;
pub mod name;
pub mod value;
pub mod window;

pub use counter::{Aggregate, Average, AverageTiming, Counter, Kind, Sum};
pub use name::Name;
pub use value::{Mean, Value};
pub use window::{DEFAULT_WINDOW_SIZE, window, window_end};
