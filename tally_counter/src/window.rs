//! Aggregation windows
//!
//! A window is a unix timestamp rounded to the nearest multiple of the window
//! size. Window `w·k` owns every timestamp in `[w·k - w/2, w·k + w/2)`: exact
//! half-way timestamps round up, toward positive infinity. With a window size
//! of 10, `1004.9` belongs to window 1000 and `1005` to window 1010.
//!
//! Writers and the aggregator may run on different machines at different
//! times. Both sides agree on window identity because this function is pure.

use std::num::NonZeroU32;

/// The window size used when none is configured, in seconds.
pub const DEFAULT_WINDOW_SIZE: NonZeroU32 = match NonZeroU32::new(10) {
    Some(size) => size,
    None => unreachable!(),
};

/// The aggregation window for `timestamp`, given in unix seconds.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn window(timestamp: f64, size: NonZeroU32) -> i64 {
    let size = f64::from(size.get());
    let bucket = (timestamp / size + 0.5).floor();
    (bucket * size) as i64
}

/// The first unix second no longer owned by `window`.
#[must_use]
pub fn window_end(window: i64, size: NonZeroU32) -> i64 {
    window.saturating_add(i64::from(size.get().div_ceil(2)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn size(s: u32) -> NonZeroU32 {
        NonZeroU32::new(s).expect("non-zero size")
    }

    #[test]
    fn rounds_to_nearest_multiple() {
        let ten = size(10);
        assert_eq!(window(1000.0, ten), 1000);
        assert_eq!(window(1001.0, ten), 1000);
        assert_eq!(window(1004.9, ten), 1000);
        assert_eq!(window(995.0, ten), 1000);
        assert_eq!(window(994.9, ten), 990);
        assert_eq!(window(1006.0, ten), 1010);
    }

    #[test]
    fn half_way_rounds_up() {
        let ten = size(10);
        assert_eq!(window(1005.0, ten), 1010);
        assert_eq!(window(15.0, ten), 20);
        assert_eq!(window(5.0, ten), 10);
        assert_eq!(window(-5.0, ten), 0);
        assert_eq!(window(-15.0, ten), -10);
    }

    #[test]
    fn odd_sizes() {
        let three = size(3);
        assert_eq!(window(1.5, three), 3);
        assert_eq!(window(1.4, three), 0);
        assert_eq!(window_end(3, three), 5);
    }

    #[test]
    fn window_end_is_half_a_window_later() {
        assert_eq!(window_end(1000, size(10)), 1005);
        assert_eq!(window(f64::from(1005 - 1), size(10)), 1000);
    }

    proptest! {
        #[test]
        fn window_is_a_nearby_multiple(timestamp in 0u32..4_000_000_000u32, frac in 0.0f64..1.0, s in 1u32..3_600) {
            let t = f64::from(timestamp) + frac;
            let w = window(t, size(s));
            prop_assert_eq!(w % i64::from(s), 0);
            let half = f64::from(s) / 2.0;
            #[allow(clippy::cast_precision_loss)]
            let wf = w as f64;
            prop_assert!(wf - half <= t + 1e-6, "window {} too far above {}", w, t);
            prop_assert!(t < wf + half + 1e-6, "window {} too far below {}", w, t);
        }

        #[test]
        fn window_of_a_window_is_stable(k in -1_000_000i64..1_000_000, s in 1u32..3_600) {
            let w = k * i64::from(s);
            #[allow(clippy::cast_precision_loss)]
            let wf = w as f64;
            prop_assert_eq!(window(wf, size(s)), w);
        }
    }
}
