//! Finalized counter values.
//!
//! These are the values that travel through the queue and land in permanent
//! records. Their JSON form is either a bare integer or a two element array:
//!
//! ```text
//! 42            Sum
//! [15.0, 2]     Average (value, weight)
//! [50, 1]       AverageTiming (integer milliseconds, weight)
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
/// The mean component of a [`Value::Weighted`].
pub enum Mean {
    /// A signed integer, 64 bits wide
    Int(i64),
    /// A floating point, 64 bits wide
    Float(f64),
}

impl Mean {
    /// The mean as a float, regardless of representation.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Mean::Int(v) => v as f64,
            Mean::Float(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
/// A finalized, or partially aggregated, counter value.
pub enum Value {
    /// The running total of a `Sum` counter.
    Count(i64),
    /// A mean and the number of observations it was computed over.
    Weighted(Mean, u64),
}
