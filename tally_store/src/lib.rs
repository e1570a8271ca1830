//! Durable queue and permanent store contracts for tally
//!
//! The aggregation pipeline is written against two abstractions:
//!
//! * [`queue::Queue`], an at-least-once pull queue with tags, delayed
//!   visibility and time-bounded leases.
//! * [`store::Store`], a hierarchical key/content store whose entries carry
//!   metadata that can be filtered on.
//!
//! Each comes with an in-memory implementation, for tests and single process
//! use, and a directory-backed implementation.

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

pub mod queue;
pub mod store;

pub use queue::{FsQueue, MemoryQueue, NewTask, Queue, Task};
pub use store::{File, Filter, FsStore, MemoryStore, Meta, Store};
