//! The event-time coalescer: merges per-partition watermark policies into a
//! single monotone watermark stream, with idle-timeout handling and optional
//! throttling to frame boundaries.
//!
//! This is the hardest subsystem in the crate. The algorithm below is a
//! direct, careful port of the reference merge step; see `DESIGN.md` for the
//! one behavior that is deliberately preserved unchanged even though it looks
//! like a bug (suppressed emission when no throttling frame is configured).

use serde::{Deserialize, Serialize};

use crate::error::EventTimeError;
use crate::numeric::MAX_VALUE;
use crate::numeric::MIN_VALUE;
use crate::traverser::AppendableTraverser;
use crate::watermark::{Watermark, WatermarkPolicy};
use crate::window::SlidingWindowPolicy;

/// A single partition's watermark value, as carried across a snapshot
/// boundary by a host runtime. The wire format a runtime stores this in is
/// out of scope here; this is just the value shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionWatermarkSnapshot {
    pub partition_index: usize,
    pub watermark: i64,
}

/// Sentinel native event time meaning "no native timestamp is available".
pub const NO_NATIVE_TIME: i64 = MIN_VALUE;

/// One item emitted by the coalescer: either a watermark or a wrapped event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampedItem<O> {
    Watermark(Watermark),
    Item(O),
}

/// Static configuration for an [`EventTimeMapper`].
pub struct EventTimePolicy<T, O, P, NewPolicy, WrapFn>
where
    NewPolicy: Fn() -> P,
    WrapFn: Fn(T, i64) -> O,
{
    pub timestamp_fn: Option<Box<dyn Fn(&T) -> i64>>,
    pub new_wm_policy_fn: NewPolicy,
    pub wrap_fn: WrapFn,
    pub idle_timeout_millis: i64,
    pub watermark_throttling_frame_size: i64,
    pub watermark_throttling_frame_offset: i64,
}

impl<T, O, P, NewPolicy, WrapFn> EventTimePolicy<T, O, P, NewPolicy, WrapFn>
where
    NewPolicy: Fn() -> P,
    WrapFn: Fn(T, i64) -> O,
{
    pub fn new(
        timestamp_fn: Option<Box<dyn Fn(&T) -> i64>>,
        new_wm_policy_fn: NewPolicy,
        wrap_fn: WrapFn,
        idle_timeout_millis: i64,
        watermark_throttling_frame_size: i64,
        watermark_throttling_frame_offset: i64,
    ) -> Self {
        EventTimePolicy {
            timestamp_fn,
            new_wm_policy_fn,
            wrap_fn,
            idle_timeout_millis,
            watermark_throttling_frame_size,
            watermark_throttling_frame_offset,
        }
    }
}

impl<T: 'static, P, NewPolicy> EventTimePolicy<T, T, P, NewPolicy, fn(T, i64) -> T>
where
    NewPolicy: Fn() -> P,
{
    /// Builds a policy whose `wrapFn` just passes the event through unchanged.
    pub fn no_wrapping(
        timestamp_fn: Option<Box<dyn Fn(&T) -> i64>>,
        new_wm_policy_fn: NewPolicy,
        idle_timeout_millis: i64,
        watermark_throttling_frame_size: i64,
        watermark_throttling_frame_offset: i64,
    ) -> Self {
        EventTimePolicy::new(
            timestamp_fn,
            new_wm_policy_fn,
            |item, _ts| item,
            idle_timeout_millis,
            watermark_throttling_frame_size,
            watermark_throttling_frame_offset,
        )
    }
}

/// Merges per-partition event timestamps into a single downstream watermark
/// stream. One instance is owned by a single source processor.
pub struct EventTimeMapper<T, O, P: WatermarkPolicy> {
    idle_timeout_nanos: i64,
    timestamp_fn: Option<Box<dyn Fn(&T) -> i64>>,
    new_wm_policy_fn: Box<dyn Fn() -> P>,
    wrap_fn: Box<dyn Fn(T, i64) -> O>,
    watermark_throttling_frame: Option<SlidingWindowPolicy>,

    wm_policies: Vec<P>,
    watermarks: Vec<i64>,
    mark_idle_at: Vec<i64>,
    last_emitted_wm: i64,
    top_observed_wm: i64,
    all_are_idle: bool,
    traverser: AppendableTraverser<TimestampedItem<O>>,
}

impl<T, O, P: WatermarkPolicy> EventTimeMapper<T, O, P> {
    pub fn new<NewPolicy, WrapFn>(policy: EventTimePolicy<T, O, P, NewPolicy, WrapFn>) -> Self
    where
        NewPolicy: Fn() -> P + 'static,
        WrapFn: Fn(T, i64) -> O + 'static,
    {
        let watermark_throttling_frame = if policy.watermark_throttling_frame_size != 0 {
            Some(
                SlidingWindowPolicy::tumbling(policy.watermark_throttling_frame_size)
                    .with_offset(policy.watermark_throttling_frame_offset),
            )
        } else {
            None
        };
        EventTimeMapper {
            idle_timeout_nanos: policy.idle_timeout_millis.saturating_mul(1_000_000),
            timestamp_fn: policy.timestamp_fn,
            new_wm_policy_fn: Box::new(policy.new_wm_policy_fn),
            wrap_fn: Box::new(policy.wrap_fn),
            watermark_throttling_frame,
            wm_policies: Vec::new(),
            watermarks: Vec::new(),
            mark_idle_at: Vec::new(),
            last_emitted_wm: MIN_VALUE,
            top_observed_wm: MIN_VALUE,
            all_are_idle: false,
            traverser: AppendableTraverser::new(),
        }
    }

    /// Call when there is no event to emit right now (a periodic scheduler tick).
    pub fn flat_map_idle(&mut self, now: i64) -> &mut AppendableTraverser<TimestampedItem<O>> {
        self.handle_no_event_internal(now, MAX_VALUE);
        &mut self.traverser
    }

    /// Flat-maps one event, possibly prepending watermarks ahead of it.
    ///
    /// `partition_index` selects which partition's watermark policy observes
    /// the event. Fails with [`EventTimeError::ConfigurationError`] if no
    /// timestamp function is configured and `native_event_time` is
    /// [`NO_NATIVE_TIME`].
    pub fn flat_map_event(
        &mut self,
        now: i64,
        event: Option<T>,
        partition_index: usize,
        native_event_time: i64,
    ) -> Result<&mut AppendableTraverser<TimestampedItem<O>>, EventTimeError> {
        let Some(event) = event else {
            self.handle_no_event_internal(now, MAX_VALUE);
            return Ok(&mut self.traverser);
        };

        let event_time = if let Some(ts_fn) = &self.timestamp_fn {
            ts_fn(&event)
        } else if native_event_time != NO_NATIVE_TIME {
            native_event_time
        } else {
            return Err(EventTimeError::ConfigurationError);
        };

        self.handle_event_internal(now, partition_index, event_time);
        let wrapped = (self.wrap_fn)(event, event_time);
        self.traverser.append(TimestampedItem::Item(wrapped));
        Ok(&mut self.traverser)
    }

    fn handle_event_internal(&mut self, now: i64, partition_index: usize, event_time: i64) {
        self.wm_policies[partition_index].report_event(event_time);
        if self.idle_timeout_nanos > 0 {
            self.mark_idle_at[partition_index] = now.saturating_add(self.idle_timeout_nanos);
        }
        self.all_are_idle = false;
        self.handle_no_event_internal(now, event_time);
    }

    /// The watermark-merge step: recomputes the per-partition watermarks,
    /// detects all-idle transitions, and appends any newly-crossed watermark
    /// (plus the idle sentinel on the transition into all-idle) to the
    /// output traverser.
    fn handle_no_event_internal(&mut self, now: i64, max_wm_value: i64) {
        let mut min = MAX_VALUE;
        for i in 0..self.watermarks.len() {
            if self.idle_timeout_nanos > 0 && self.mark_idle_at[i] <= now {
                continue;
            }
            let candidate = self.wm_policies[i].current_watermark().min(max_wm_value);
            self.watermarks[i] = self.watermarks[i].max(candidate);
            self.top_observed_wm = self.top_observed_wm.max(self.watermarks[i]);
            min = min.min(self.watermarks[i]);
        }

        if min == MAX_VALUE {
            if self.all_are_idle {
                return;
            }
            min = self.top_observed_wm;
            self.all_are_idle = true;
            log::debug!("all partitions idle, emitting idle sentinel (top observed watermark {min})");
        } else {
            self.all_are_idle = false;
        }

        if min > self.last_emitted_wm {
            // Open question preserved as-is: with no throttling frame configured,
            // the merge step does not emit a raw watermark; it only ever emits
            // through the throttling-frame path. See DESIGN.md.
            let new_wm = match &self.watermark_throttling_frame {
                Some(frame) => frame.floor_frame_ts(min),
                None => MIN_VALUE,
            };
            if new_wm > self.last_emitted_wm {
                self.traverser.append(TimestampedItem::Watermark(Watermark::new(new_wm)));
                self.last_emitted_wm = new_wm;
            } else {
                log::trace!("watermark emission suppressed: candidate {new_wm} <= last emitted {}", self.last_emitted_wm);
            }
        }

        if self.all_are_idle {
            self.traverser.append(TimestampedItem::Watermark(Watermark::new(MAX_VALUE)));
        }
    }

    /// Adds `added_count` new partitions, starting active with watermark `Min_Value`.
    pub fn add_partitions(&mut self, now: i64, added_count: usize) {
        for _ in 0..added_count {
            self.wm_policies.push((self.new_wm_policy_fn)());
            self.watermarks.push(MIN_VALUE);
            self.mark_idle_at.push(now.saturating_add(self.idle_timeout_nanos));
        }
    }

    /// Removes partition `index`, preserving the order of the remaining
    /// partitions, then re-runs the merge step (which may unblock a pending
    /// watermark if the removed partition was the laggard).
    pub fn remove_partition(&mut self, now: i64, index: usize) -> &mut AppendableTraverser<TimestampedItem<O>> {
        self.wm_policies.remove(index);
        self.watermarks.remove(index);
        self.mark_idle_at.remove(index);
        self.handle_no_event_internal(now, MAX_VALUE);
        &mut self.traverser
    }

    pub fn partition_count(&self) -> usize {
        self.wm_policies.len()
    }

    /// Restores a watermark value from a snapshot without emitting a
    /// regressive watermark: `lastEmittedWm` is recomputed as the minimum
    /// across all partitions.
    pub fn restore_watermark(&mut self, partition_index: usize, wm: i64) {
        self.watermarks[partition_index] = wm;
        self.last_emitted_wm = self.watermarks.iter().copied().fold(MAX_VALUE, i64::min);
    }

    /// Captures every partition's current watermark for a snapshot.
    pub fn snapshot(&self) -> Vec<PartitionWatermarkSnapshot> {
        self.watermarks
            .iter()
            .enumerate()
            .map(|(partition_index, &watermark)| PartitionWatermarkSnapshot { partition_index, watermark })
            .collect()
    }

    /// Restores every partition watermark from a snapshot taken by [`Self::snapshot`].
    pub fn restore_all(&mut self, snapshot: &[PartitionWatermarkSnapshot]) {
        for entry in snapshot {
            self.restore_watermark(entry.partition_index, entry.watermark);
        }
    }
}
