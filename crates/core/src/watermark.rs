//! Per-partition event-time policies and the [`Watermark`] output item.

use serde::{Deserialize, Serialize};

use crate::numeric::MIN_VALUE;

/// A watermark: asserts that no further events with timestamp less than
/// `timestamp` will arrive on this stream.
///
/// Serializable so a host runtime can carry it across a snapshot boundary
/// (see [`crate::event_time::EventTimeMapper::restore_watermark`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    pub timestamp: i64,
}

impl Watermark {
    pub const fn new(timestamp: i64) -> Self {
        Watermark { timestamp }
    }
}

/// Tracks and reports the current watermark given event timestamps observed
/// on a single input stream.
///
/// Implementations must report a monotone non-decreasing watermark
/// regardless of the order in which events are reported.
pub trait WatermarkPolicy {
    /// Reports the observation of an event with the given timestamp.
    fn report_event(&mut self, timestamp: i64);

    /// Returns the current watermark without advancing any state.
    fn current_watermark(&self) -> i64;
}

/// Reference watermark policy: the watermark lags behind the highest
/// observed timestamp by a fixed amount.
#[derive(Debug, Clone, Copy)]
pub struct LimitingLag {
    wm: i64,
    lag: i64,
}

impl LimitingLag {
    pub fn new(lag: i64) -> Self {
        LimitingLag { wm: MIN_VALUE, lag }
    }
}

impl WatermarkPolicy for LimitingLag {
    fn report_event(&mut self, timestamp: i64) {
        if timestamp >= MIN_VALUE.saturating_add(self.lag) {
            self.wm = self.wm.max(timestamp - self.lag);
        }
    }

    fn current_watermark(&self) -> i64 {
        self.wm
    }
}

/// Builds a fresh [`LimitingLag`] policy for a given lag; used as the
/// `newWmPolicyFn` supplied to an [`crate::event_time::EventTimeMapper`].
pub fn limiting_lag(lag: i64) -> impl Fn() -> LimitingLag + Clone {
    move || LimitingLag::new(lag)
}
