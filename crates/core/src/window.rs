//! Sliding/tumbling window frame-boundary arithmetic.

use crate::numeric::{floor_mod, subtract_clamped, MAX_VALUE, MIN_VALUE};

/// Defines a sequence of fixed-size, possibly-overlapping frames on the
/// event-time axis: `[k*frameSize + frameOffset, (k+1)*frameSize + frameOffset)`.
///
/// A window spans `framesPerWindow = windowSize / frameSize` consecutive
/// frames; `isTumbling()` is the degenerate case of exactly one frame per
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowPolicy {
    pub frame_size: i64,
    pub frame_offset: i64,
    pub window_size: i64,
}

impl SlidingWindowPolicy {
    /// `frame_size` must be positive; `frame_offset` is taken modulo `frame_size`.
    pub fn new(frame_size: i64, frame_offset: i64, window_size: i64) -> Self {
        assert!(frame_size > 0, "frame_size must be positive");
        SlidingWindowPolicy {
            frame_size,
            frame_offset: floor_mod(frame_offset, frame_size),
            window_size,
        }
    }

    /// A tumbling policy (one frame per window) of the given size.
    pub fn tumbling(frame_size: i64) -> Self {
        SlidingWindowPolicy::new(frame_size, 0, frame_size)
    }

    pub fn is_tumbling(&self) -> bool {
        self.frame_size == self.window_size
    }

    /// Returns a policy with the same frame/window size but a new offset.
    pub fn with_offset(&self, frame_offset: i64) -> Self {
        SlidingWindowPolicy::new(self.frame_size, frame_offset, self.window_size)
    }

    /// Returns a tumbling policy whose frame size equals this policy's frame size.
    pub fn to_tumbling_by_frame(&self) -> Self {
        SlidingWindowPolicy::new(self.frame_size, self.frame_offset, self.frame_size)
    }

    /// The largest frame timestamp `<= t`, clamped to `MIN_VALUE` on underflow.
    pub fn floor_frame_ts(&self, t: i64) -> i64 {
        if t < MIN_VALUE.saturating_add(self.frame_offset) {
            return MIN_VALUE;
        }
        subtract_clamped(t, floor_mod(subtract_clamped(t, self.frame_offset), self.frame_size))
    }

    /// The smallest frame timestamp `> t`, clamped to `MAX_VALUE` on overflow.
    pub fn higher_frame_ts(&self, t: i64) -> i64 {
        match t.checked_add(self.frame_size) {
            Some(shifted) => self.floor_frame_ts(shifted),
            None => MAX_VALUE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_frame(p: &SlidingWindowPolicy, t: i64, floor: i64, higher: i64) {
        assert_eq!(p.floor_frame_ts(t), floor, "floor_frame_ts({t})");
        assert_eq!(p.higher_frame_ts(t), higher, "higher_frame_ts({t})");
    }

    #[test]
    fn no_offset() {
        let p = SlidingWindowPolicy::new(4, 0, 10);
        assert_frame(&p, -5, -8, -4);
        assert_frame(&p, -4, -4, 0);
        assert_frame(&p, -3, -4, 0);
        assert_frame(&p, -2, -4, 0);
        assert_frame(&p, -1, -4, 0);
        assert_frame(&p, 0, 0, 4);
        assert_frame(&p, 1, 0, 4);
        assert_frame(&p, 2, 0, 4);
        assert_frame(&p, 3, 0, 4);
        assert_frame(&p, 4, 4, 8);
        assert_frame(&p, 5, 4, 8);
        assert_frame(&p, 6, 4, 8);
        assert_frame(&p, 7, 4, 8);
        assert_frame(&p, 8, 8, 12);
    }

    #[test]
    fn offset_one() {
        let p = SlidingWindowPolicy::new(4, 1, 10);
        assert_frame(&p, -4, -7, -3);
        assert_frame(&p, -3, -3, 1);
        assert_frame(&p, -2, -3, 1);
        assert_frame(&p, -1, -3, 1);
        assert_frame(&p, 0, -3, 1);
        assert_frame(&p, 1, 1, 5);
        assert_frame(&p, 2, 1, 5);
        assert_frame(&p, 3, 1, 5);
        assert_frame(&p, 4, 1, 5);
        assert_frame(&p, 5, 5, 9);
        assert_frame(&p, 6, 5, 9);
        assert_frame(&p, 7, 5, 9);
        assert_frame(&p, 8, 5, 9);
        assert_frame(&p, 9, 9, 13);
    }

    #[test]
    fn offset_two() {
        let p = SlidingWindowPolicy::new(4, 2, 10);
        assert_frame(&p, -4, -6, -2);
        assert_frame(&p, -3, -6, -2);
        assert_frame(&p, -2, -2, 2);
        assert_frame(&p, -1, -2, 2);
        assert_frame(&p, 0, -2, 2);
        assert_frame(&p, 1, -2, 2);
        assert_frame(&p, 2, 2, 6);
        assert_frame(&p, 3, 2, 6);
        assert_frame(&p, 4, 2, 6);
        assert_frame(&p, 5, 2, 6);
        assert_frame(&p, 6, 6, 10);
        assert_frame(&p, 7, 6, 10);
        assert_frame(&p, 8, 6, 10);
        assert_frame(&p, 9, 6, 10);
    }

    #[test]
    fn frame_size_three_min_value_clamps() {
        let p = SlidingWindowPolicy::new(3, 0, 10);
        assert_eq!(p.floor_frame_ts(MIN_VALUE), MIN_VALUE);
    }

    #[test]
    fn floor_out_of_range_clamps_to_extremes() {
        let p = SlidingWindowPolicy::new(4, 3, 10);
        assert_eq!(p.floor_frame_ts(MIN_VALUE + 2), MIN_VALUE);
        assert_eq!(p.floor_frame_ts(MAX_VALUE), MAX_VALUE);
    }

    #[test]
    fn higher_out_of_range_clamps_to_extremes() {
        let p = SlidingWindowPolicy::new(4, 2, 10);
        assert_eq!(p.higher_frame_ts(MAX_VALUE - 1), MAX_VALUE);
        assert_eq!(p.higher_frame_ts(MIN_VALUE), MIN_VALUE + 2);
    }

    #[test]
    fn tumbling_constructor() {
        let p = SlidingWindowPolicy::tumbling(123);
        assert_eq!(p.frame_size, 123);
        assert_eq!(p.window_size, 123);
        assert_eq!(p.frame_offset, 0);
        assert!(p.is_tumbling());
    }

    #[test]
    fn to_tumbling_by_frame_preserves_frame_size() {
        let p = SlidingWindowPolicy::new(100, 0, 1000).to_tumbling_by_frame();
        assert_eq!(p.frame_size, 100);
        assert_eq!(p.window_size, 100);
    }

    #[test]
    fn with_offset_preserves_frame_and_window_size() {
        let p = SlidingWindowPolicy::new(1000, 0, 100);
        assert_eq!(p.frame_offset, 0);
        let p2 = p.with_offset(10);
        assert_eq!(p2.frame_offset, 10);
        assert_eq!(p2.frame_size, 1000);
        assert_eq!(p2.window_size, 100);
    }

    proptest::proptest! {
        #[test]
        fn floor_le_t_lt_higher(t in (MIN_VALUE + 100)..(MAX_VALUE - 100), frame_size in 1i64..1000) {
            let p = SlidingWindowPolicy::new(frame_size, 0, frame_size);
            let floor = p.floor_frame_ts(t);
            let higher = p.higher_frame_ts(t);
            proptest::prop_assert!(floor <= t);
            proptest::prop_assert!(t < higher);
            proptest::prop_assert_eq!(higher - floor, frame_size);
        }
    }
}
