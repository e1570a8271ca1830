//! The tally clock mechanism
//!
//! Every component of tally that needs to know what time it is, or needs to
//! wait, does so through [`Clock`]. Production code uses [`RealClock`]; tests
//! use [`ManualClock`] so that lease expiry and polling backoff are
//! deterministic and never actually sleep.

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

use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::time;

pub mod backoff;

pub use backoff::Backoff;

#[async_trait]
/// The `Clock` used for every time-sensitive tally component
pub trait Clock: Send + Sync {
    /// The current wall-clock time as fractional unix seconds.
    fn now(&self) -> f64;
    /// Wait for `duration` amount of time.
    async fn wait(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    /// Return the number of seconds since the unix epoch.
    ///
    /// A system clock set before the epoch reads as zero.
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    async fn wait(&self, duration: Duration) {
        time::sleep(duration).await;
    }
}

#[derive(Debug, Default)]
struct ManualState {
    now: f64,
    waits: Vec<Duration>,
}

/// A clock that only moves when told to.
///
/// Waiting on a `ManualClock` advances it by the waited duration and returns
/// immediately. Every wait is recorded and may be inspected with
/// [`ManualClock::waits`]. Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Create a new `ManualClock` reading `now` unix seconds.
    #[must_use]
    pub fn new(now: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now,
                waits: Vec::new(),
            })),
        }
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += duration.as_secs_f64();
    }

    /// Set the clock to an absolute unix time.
    pub fn set(&self, now: f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now = now;
    }

    /// All durations waited on this clock, in order.
    #[must_use]
    pub fn waits(&self) -> Vec<Duration> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.waits.clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .now
    }

    async fn wait(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += duration.as_secs_f64();
        state.waits.push(duration);
    }
}
