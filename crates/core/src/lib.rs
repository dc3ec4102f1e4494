//! `streamdag_core`: the DAG model, edge routing, event-time coalescer and
//! aggregate-operation algebra behind a distributed stream/batch processing
//! engine.
//!
//! This crate is the embeddable core of a job runtime: it owns the
//! topology (`dag`, `edge`), the per-partition watermark bookkeeping that
//! turns scattered event-time progress into one monotone stream
//! (`watermark`, `window`, `event_time`), the composable aggregation algebra
//! windowed jobs are built from (`aggregate`, `tuple`), and the cooperative
//! per-processor contract the host runtime drives (`processor`). Cluster
//! membership, serialization, and the fluent pipeline DSL that lowers to a
//! `Dag` are intentionally out of scope; see `DESIGN.md`.

pub mod aggregate;
pub mod dag;
pub mod edge;
pub mod error;
pub mod event_time;
pub mod numeric;
pub mod partitioner;
pub mod processor;
pub mod traverser;
pub mod tuple;
pub mod watermark;
pub mod window;
