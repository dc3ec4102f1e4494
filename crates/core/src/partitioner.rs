//! Routes items to partitions: the strategy behind a `PARTITIONED` edge.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use once_cell::sync::Lazy;

use crate::error::EventTimeError;

/// Capability injected by the runtime that actually computes a partition id
/// for a routing key, bounded by the current partition count.
pub trait DefaultPartitionStrategy<K> {
    fn get_partition(&self, key: &K, partition_count: usize) -> usize;
}

/// A partitioner assigns each item a partition id in `[0, partition_count)`.
///
/// `init` is called exactly once by the runtime, before routing begins, and
/// must be propagated to any wrapped inner partitioner.
pub trait Partitioner<T> {
    fn get_partition(&self, item: &T, partition_count: usize) -> Result<usize, EventTimeError>;

    fn init(&mut self, default_strategy: Rc<dyn DefaultPartitionStrategy<T>>);
}

/// Delegates directly to an injected [`DefaultPartitionStrategy`].
pub struct DefaultPartitioner<T> {
    strategy: Option<Rc<dyn DefaultPartitionStrategy<T>>>,
}

impl<T> Default for DefaultPartitioner<T> {
    fn default() -> Self {
        DefaultPartitioner { strategy: None }
    }
}

impl<T> DefaultPartitioner<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> Partitioner<T> for DefaultPartitioner<T> {
    fn get_partition(&self, item: &T, partition_count: usize) -> Result<usize, EventTimeError> {
        let strategy = self.strategy.as_deref().expect("DefaultPartitioner used before init()");
        Ok(strategy.get_partition(item, partition_count))
    }

    fn init(&mut self, default_strategy: Rc<dyn DefaultPartitionStrategy<T>>) {
        self.strategy = Some(default_strategy);
    }
}

/// Extracts a routing key via `key_fn`, then delegates to an inner
/// partitioner *with the key*, not the original item.
///
/// Fails with [`EventTimeError::NullPartitionKey`] if the extractor returns
/// `None`.
pub struct KeyPartitioner<T, K> {
    key_fn: Box<dyn Fn(&T) -> Option<K>>,
    inner: Box<dyn Partitioner<K>>,
}

impl<T, K> KeyPartitioner<T, K> {
    pub fn new(key_fn: Box<dyn Fn(&T) -> Option<K>>, inner: Box<dyn Partitioner<K>>) -> Self {
        KeyPartitioner { key_fn, inner }
    }
}

impl<T, K> Partitioner<T> for KeyPartitioner<T, K> {
    fn get_partition(&self, item: &T, partition_count: usize) -> Result<usize, EventTimeError> {
        let key = (self.key_fn)(item).ok_or(EventTimeError::NullPartitionKey)?;
        self.inner.get_partition(&key, partition_count)
    }

    fn init(&mut self, _default_strategy: Rc<dyn DefaultPartitionStrategy<T>>) {
        // The inner partitioner operates over K, not T: the wrapped
        // strategy is of a different key type and must be supplied to it
        // directly via `inner.init(...)` by the caller that owns it, e.g.
        // `allToOne`'s construction path. There is no `T`-typed strategy to
        // forward here.
    }
}

/// The fallback strategy used when an edge is partitioned without supplying
/// its own [`DefaultPartitionStrategy`]: routes by the key's hash modulo the
/// partition count. Lazily constructed once and shared across every edge
/// that falls back to it.
pub struct HashModStrategy;

impl<K: Hash> DefaultPartitionStrategy<K> for HashModStrategy {
    fn get_partition(&self, key: &K, partition_count: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % partition_count as u64) as usize
    }
}

static DEFAULT_HASH_STRATEGY: Lazy<HashModStrategy> = Lazy::new(|| HashModStrategy);

/// A [`DefaultPartitioner`] pre-initialized with the shared hash-modulo
/// fallback strategy, for call sites that don't need a custom one.
pub fn default_hash_partitioner<K: Hash + 'static>() -> DefaultPartitioner<K> {
    let mut partitioner = DefaultPartitioner::new();
    partitioner.init(Rc::new(&*DEFAULT_HASH_STRATEGY));
    partitioner
}

impl<K: Hash> DefaultPartitionStrategy<K> for &'static HashModStrategy {
    fn get_partition(&self, key: &K, partition_count: usize) -> usize {
        (**self).get_partition(key, partition_count)
    }
}

/// Fixes a single partition at construction time and always returns it,
/// implementing "route everything to one downstream processor".
pub struct SinglePartitioner {
    partition: usize,
}

impl SinglePartitioner {
    /// `strategy.get_partition(key, partition_count)` is evaluated once, up front.
    pub fn new<K>(strategy: &dyn DefaultPartitionStrategy<K>, key: &K, partition_count: usize) -> Self {
        SinglePartitioner {
            partition: strategy.get_partition(key, partition_count),
        }
    }
}

impl<T> Partitioner<T> for SinglePartitioner {
    fn get_partition(&self, _item: &T, _partition_count: usize) -> Result<usize, EventTimeError> {
        Ok(self.partition)
    }

    fn init(&mut self, _default_strategy: Rc<dyn DefaultPartitionStrategy<T>>) {
        // Fixed at construction time; nothing to propagate.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Modulo;
    impl DefaultPartitionStrategy<i64> for Modulo {
        fn get_partition(&self, key: &i64, partition_count: usize) -> usize {
            (*key as usize) % partition_count
        }
    }

    #[test]
    fn default_partitioner_delegates_to_strategy() {
        let mut p = DefaultPartitioner::new();
        p.init(Rc::new(Modulo));
        assert_eq!(p.get_partition(&7, 4).unwrap(), 3);
        assert_eq!(p.get_partition(&8, 4).unwrap(), 0);
    }

    #[test]
    #[should_panic(expected = "before init")]
    fn default_partitioner_panics_before_init() {
        let p: DefaultPartitioner<i64> = DefaultPartitioner::new();
        let _ = p.get_partition(&1, 4);
    }

    #[test]
    fn key_partitioner_delegates_with_the_key_not_the_item() {
        struct Item {
            key: i64,
        }
        let mut inner = DefaultPartitioner::new();
        inner.init(Rc::new(Modulo));
        let kp = KeyPartitioner::new(Box::new(|item: &Item| Some(item.key)), Box::new(inner));
        let item = Item { key: 9 };
        assert_eq!(kp.get_partition(&item, 4).unwrap(), 1);
    }

    #[test]
    fn key_partitioner_fails_on_missing_key() {
        let mut inner = DefaultPartitioner::new();
        inner.init(Rc::new(Modulo));
        let kp: KeyPartitioner<Option<i64>, i64> =
            KeyPartitioner::new(Box::new(|item: &Option<i64>| *item), Box::new(inner));
        let err = kp.get_partition(&None, 4).unwrap_err();
        assert_eq!(err, EventTimeError::NullPartitionKey);
    }

    #[test]
    fn default_hash_partitioner_is_deterministic_and_in_range() {
        let p = default_hash_partitioner::<i64>();
        let a = p.get_partition(&42, 8).unwrap();
        let b = p.get_partition(&42, 8).unwrap();
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn single_partitioner_always_returns_fixed_partition() {
        let p = SinglePartitioner::new(&Modulo, &10i64, 4);
        assert_eq!(Partitioner::<&str>::get_partition(&p, &"anything", 4).unwrap(), 2);
        assert_eq!(Partitioner::<&str>::get_partition(&p, &"else", 4).unwrap(), 2);
    }
}
