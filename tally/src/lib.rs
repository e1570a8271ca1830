//! The tally windowed counter aggregation pipeline.
//!
//! Application code records observations into counters held by a
//! [`registry::LocalCounters`] for the duration of one unit of work. At the
//! end of that work the counters are flushed through a
//! [`writer::BatchWriter`], which finalizes them and defers their storage
//! through a durable queue. Some time after the aggregation window closes an
//! [`aggregator::Aggregator`] leases every batch of that window, merges them
//! and appends the result to permanent per-day records. The
//! [`query::CountersService`] reads those records back.
//!
//! This library supports the tally binary found elsewhere in this project.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod aggregator;
pub mod config;
pub mod path;
pub mod query;
pub mod recorder;
pub mod registry;
pub mod writer;

#[cfg(test)]
pub(crate) mod test;
