//! Doubling backoff for polling loops.
//!
//! A poller that finds no work waits [`Backoff::delay`], then calls
//! [`Backoff::advance`] so that the next empty poll waits twice as long, up
//! to a fixed maximum. Any poll that finds work calls [`Backoff::reset`].

use std::time::Duration;

/// Errors produced by [`Backoff`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The initial delay was zero.
    #[error("Backoff initial delay must be non-zero")]
    ZeroInitial,
    /// The maximum delay was less than the initial delay.
    #[error("Backoff maximum {maximum:?} is less than initial {initial:?}")]
    MaximumBelowInitial {
        /// Requested initial delay
        initial: Duration,
        /// Requested maximum delay
        maximum: Duration,
    },
}

/// A capped, doubling delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    maximum: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a new `Backoff` starting at `initial` and never exceeding
    /// `maximum`.
    ///
    /// # Errors
    ///
    /// Returns an error if `initial` is zero or `maximum < initial`.
    pub fn new(initial: Duration, maximum: Duration) -> Result<Self, Error> {
        if initial.is_zero() {
            return Err(Error::ZeroInitial);
        }
        if maximum < initial {
            return Err(Error::MaximumBelowInitial { initial, maximum });
        }
        Ok(Self {
            initial,
            maximum,
            current: initial,
        })
    }

    /// The delay to wait before the next poll.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.current
    }

    /// Double the delay, capped at the maximum.
    pub fn advance(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.maximum);
    }

    /// Return the delay to its initial value.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
