//! Typed failure domains for DAG construction and event-time processing.
//!
//! Every kind here is distinguished by its variant, not by a formatted
//! message: callers are expected to `match`/`matches!` on these, not grep
//! `Display` output.

use thiserror::Error;

/// Errors raised while building or validating a [`crate::dag::Dag`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DagError {
    #[error("vertex `{name}` already exists in the DAG")]
    DuplicateVertex { name: String },

    #[error("no vertex named `{name}` exists in the DAG")]
    UnknownVertex { name: String },

    #[error("a vertex named `{name}` exists but is not the identity passed to edge()")]
    VertexNameCollision { name: String },

    #[error("ordinal {ordinal} is already in use on the {end:?} side of `{vertex}`")]
    OrdinalInUse { vertex: String, ordinal: usize, end: EdgeEnd },

    #[error("self-edges are not allowed (`{vertex}` -> `{vertex}`)")]
    SelfEdge { vertex: String },

    #[error("edge destination is already set to `{existing}`")]
    DestinationAlreadySet { existing: String },

    #[error("the DAG contains a cycle involving `{example_vertex}`")]
    CycleDetected { example_vertex: String },
}

/// Which port-ordinal namespace an [`DagError::OrdinalInUse`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEnd {
    Source,
    Destination,
}

/// Errors raised by the partitioner pipeline and event-time coalescer at
/// runtime (as opposed to DAG-construction time).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventTimeError {
    #[error("key extractor returned no key for a partitioned edge")]
    NullPartitionKey,

    #[error("no timestamp available: neither a timestamp function nor a native event time was provided")]
    ConfigurationError,
}
