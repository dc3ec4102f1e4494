//! Directed connections between [`crate::dag::Vertex`] instances.

use std::any::Any;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::dag::VertexId;
use crate::error::{DagError, EventTimeError};
use crate::partitioner::{KeyPartitioner, Partitioner, SinglePartitioner};

/// Governs how items emitted by a source vertex are dispatched across the
/// destination vertex's parallel processor instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Each item goes to an arbitrary single destination processor; no
    /// ordering guarantee is made about which one.
    Unicast,
    /// Like `Unicast`, but each source processor sticks to one destination
    /// processor for its entire lifetime.
    Isolated,
    /// A partitioner picks the destination processor per item.
    Partitioned,
    /// Every item is delivered to every destination processor.
    Broadcast,
    /// Every item is delivered to every destination processor; distinguished
    /// from `Broadcast` at the runtime-scheduling layer only (not modeled here).
    Fanout,
}

/// A `Partitioner` whose concrete item type has been erased, so an [`Edge`]
/// can carry one without the `Edge`/`Dag` types themselves becoming generic
/// over stream item types (which they have no other need to know about).
pub trait ErasedPartitioner {
    fn get_partition_erased(&self, item: &dyn Any, partition_count: usize) -> Result<usize, EventTimeError>;
}

/// Carries the otherwise-erased item type `T` in its own self type, so the
/// `ErasedPartitioner` impl below has `T` available without it needing to
/// appear in `ErasedPartitioner` itself (a blanket `impl<T, P: Partitioner<T>>
/// ErasedPartitioner for P` leaves `T` unconstrained: it occurs only in the
/// bound, never in the self type or trait, which `rustc` rejects as E0207).
struct Erased<T, P> {
    inner: P,
    _item: PhantomData<fn(T)>,
}

impl<T: 'static, P: Partitioner<T>> ErasedPartitioner for Erased<T, P> {
    fn get_partition_erased(&self, item: &dyn Any, partition_count: usize) -> Result<usize, EventTimeError> {
        let item = item
            .downcast_ref::<T>()
            .expect("partitioner invoked with a mismatched item type");
        self.inner.get_partition(item, partition_count)
    }
}

/// A directed edge connecting a source vertex's output ordinal to a
/// destination vertex's input ordinal.
pub struct Edge {
    pub(crate) source: VertexId,
    pub(crate) source_name: String,
    pub(crate) source_ordinal: usize,
    pub(crate) destination: Option<VertexId>,
    pub(crate) dest_name: Option<String>,
    pub(crate) dest_ordinal: usize,
    priority: i32,
    routing_policy: RoutingPolicy,
    partitioner: Option<Rc<dyn ErasedPartitioner>>,
}

impl Edge {
    /// Starts building an edge from `source`'s output ordinal `source_ordinal`.
    pub fn from(source: VertexId, source_name: impl Into<String>, source_ordinal: usize) -> Self {
        Edge {
            source,
            source_name: source_name.into(),
            source_ordinal,
            destination: None,
            dest_name: None,
            dest_ordinal: 0,
            priority: 0,
            routing_policy: RoutingPolicy::Unicast,
            partitioner: None,
        }
    }

    /// Completes the edge with destination `dest`'s input ordinal `dest_ordinal`.
    ///
    /// Fails with [`DagError::DestinationAlreadySet`] if the destination has
    /// already been set.
    pub fn to(mut self, dest: VertexId, dest_name: impl Into<String>, dest_ordinal: usize) -> Result<Self, DagError> {
        if let Some(existing) = &self.dest_name {
            return Err(DagError::DestinationAlreadySet { existing: existing.clone() });
        }
        self.destination = Some(dest);
        self.dest_name = Some(dest_name.into());
        self.dest_ordinal = dest_ordinal;
        Ok(self)
    }

    pub fn source(&self) -> VertexId {
        self.source
    }

    pub fn destination(&self) -> Option<VertexId> {
        self.destination
    }

    pub fn source_ordinal(&self) -> usize {
        self.source_ordinal
    }

    pub fn dest_ordinal(&self) -> usize {
        self.dest_ordinal
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn routing_policy(&self) -> RoutingPolicy {
        self.routing_policy
    }

    /// Lower values drain first: if a vertex has two inbound edges with
    /// priorities 1 and 2, all data from priority 1 must be drained before
    /// any item from priority 2 is consumed.
    pub fn set_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn unicast(mut self) -> Self {
        self.routing_policy = RoutingPolicy::Unicast;
        self.partitioner = None;
        self
    }

    pub fn isolated(mut self) -> Self {
        self.routing_policy = RoutingPolicy::Isolated;
        self.partitioner = None;
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.routing_policy = RoutingPolicy::Broadcast;
        self.partitioner = None;
        self
    }

    pub fn fanout(mut self) -> Self {
        self.routing_policy = RoutingPolicy::Fanout;
        self.partitioner = None;
        self
    }

    pub fn partitioner(&self) -> Option<&Rc<dyn ErasedPartitioner>> {
        self.partitioner.as_ref()
    }

    /// Extracts a routing key via `key_fn` and wraps `inner` in a
    /// [`KeyPartitioner`] over it, then sets the routing policy to
    /// `Partitioned`. `key_fn` returning `None` fails routing at runtime
    /// with [`EventTimeError::NullPartitionKey`].
    pub fn partitioned<T: 'static, K: 'static>(
        self,
        key_fn: impl Fn(&T) -> Option<K> + 'static,
        inner: impl Partitioner<K> + 'static,
    ) -> Self {
        let kp: KeyPartitioner<T, K> = KeyPartitioner::new(Box::new(key_fn), Box::new(inner));
        let erased: Erased<T, _> = Erased { inner: kp, _item: PhantomData };
        self.partition_with(Rc::new(erased))
    }

    /// Syntactic sugar for `partitioned(identity, SinglePartitioner(key))`:
    /// routes every item on this edge to one fixed downstream processor.
    pub fn all_to_one<T: 'static, K: 'static>(
        self,
        strategy: &dyn crate::partitioner::DefaultPartitionStrategy<K>,
        key: &K,
        partition_count: usize,
    ) -> Self {
        let single = SinglePartitioner::new(strategy, key, partition_count);
        let erased: Erased<T, _> = Erased { inner: single, _item: PhantomData };
        self.partition_with(Rc::new(erased))
    }

    /// Low-level setter used by `partitioned`/`all_to_one`: installs an
    /// already-erased partitioner and switches the routing policy to
    /// `Partitioned`.
    fn partition_with(mut self, partitioner: Rc<dyn ErasedPartitioner>) -> Self {
        self.routing_policy = RoutingPolicy::Partitioned;
        self.partitioner = Some(partitioner);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_twice_fails_with_destination_already_set() {
        let v0 = VertexId::from_raw(0);
        let v1 = VertexId::from_raw(1);
        let v2 = VertexId::from_raw(2);
        let e = Edge::from(v0, "a", 0).to(v1, "b", 0).unwrap();
        let err = e.to(v2, "c", 0).unwrap_err();
        assert_eq!(err, DagError::DestinationAlreadySet { existing: "b".into() });
    }

    #[test]
    fn fluent_mutators_update_policy() {
        let v0 = VertexId::from_raw(0);
        let v1 = VertexId::from_raw(1);
        let e = Edge::from(v0, "a", 0).to(v1, "b", 0).unwrap().broadcast().set_priority(5);
        assert_eq!(e.routing_policy(), RoutingPolicy::Broadcast);
        assert_eq!(e.priority(), 5);
    }

    struct Modulo;
    impl crate::partitioner::DefaultPartitionStrategy<i64> for Modulo {
        fn get_partition(&self, key: &i64, partition_count: usize) -> usize {
            (*key as usize) % partition_count
        }
    }

    #[test]
    fn partitioned_sets_policy_and_routes_by_key() {
        let v0 = VertexId::from_raw(0);
        let v1 = VertexId::from_raw(1);
        let mut default_partitioner: crate::partitioner::DefaultPartitioner<i64> =
            crate::partitioner::DefaultPartitioner::new();
        default_partitioner.init(Rc::new(Modulo));
        let e = Edge::from(v0, "a", 0)
            .to(v1, "b", 0)
            .unwrap()
            .partitioned::<(String, i64), i64>(|item| Some(item.1), default_partitioner);
        assert_eq!(e.routing_policy(), RoutingPolicy::Partitioned);
        let item: &dyn Any = &("x".to_string(), 9i64);
        assert_eq!(e.partitioner().unwrap().get_partition_erased(item, 4).unwrap(), 1);
    }

    #[test]
    fn all_to_one_always_routes_to_fixed_partition() {
        let v0 = VertexId::from_raw(0);
        let v1 = VertexId::from_raw(1);
        let e = Edge::from(v0, "a", 0).to(v1, "b", 0).unwrap().all_to_one::<&str, i64>(&Modulo, &10i64, 4);
        assert_eq!(e.routing_policy(), RoutingPolicy::Partitioned);
        let item: &dyn Any = &"anything";
        assert_eq!(e.partitioner().unwrap().get_partition_erased(item, 4).unwrap(), 2);
    }
}
