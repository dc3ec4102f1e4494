//! The directed acyclic graph of vertices and edges that describes a pipeline's topology.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::edge::Edge;
use crate::error::{DagError, EdgeEnd};

/// Opaque handle to a vertex inserted into a [`Dag`]. Stable for the
/// lifetime of the `Dag` it was obtained from; not meaningful across `Dag`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexId(usize);

impl VertexId {
    pub(crate) fn from_raw(raw: usize) -> Self {
        VertexId(raw)
    }

    fn index(self) -> usize {
        self.0
    }
}

/// A `VertexId` paired with the name it was registered under, so that an
/// edge built from it later can detect "a vertex of this name exists, but
/// it isn't this one" rather than just trusting a stale id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexRef {
    id: VertexId,
    name: String,
}

impl VertexRef {
    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A single processing stage. `local_parallelism`, when set, overrides the
/// DAG-wide default used when sizing the vertex's processor instances.
pub struct Vertex {
    id: VertexId,
    name: String,
    local_parallelism: Option<usize>,
}

impl Vertex {
    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_parallelism(&self) -> Option<usize> {
        self.local_parallelism
    }

    pub fn set_local_parallelism(&mut self, parallelism: usize) {
        self.local_parallelism = Some(parallelism);
    }
}

/// A topology of vertices connected by edges, with no directed cycle.
///
/// Vertices and edges are kept in insertion order so that `to_string` and
/// the inbound/outbound edge listings are deterministic.
#[derive(Default)]
pub struct Dag {
    vertices: Vec<Vertex>,
    name_to_id: HashMap<String, VertexId>,
    edges: Vec<Edge>,
}

impl Dag {
    pub fn new() -> Self {
        Dag::default()
    }

    /// Adds a new vertex named `name`. Fails if that name is already in use.
    pub fn new_vertex(&mut self, name: impl Into<String>) -> Result<VertexId, DagError> {
        let name = name.into();
        if self.name_to_id.contains_key(&name) {
            return Err(DagError::DuplicateVertex { name });
        }
        let id = VertexId::from_raw(self.vertices.len());
        self.name_to_id.insert(name.clone(), id);
        self.vertices.push(Vertex { id, name, local_parallelism: None });
        Ok(id)
    }

    /// Adds a new vertex, suffixing `base_name` with `-2`, `-3`, ... until a
    /// free name is found (`base_name` itself is used if it is free).
    pub fn new_unique_vertex(&mut self, base_name: &str) -> VertexId {
        let name = self.unique_name(base_name);
        self.new_vertex(name).expect("freshly generated name must be unique")
    }

    fn unique_name(&self, base_name: &str) -> String {
        if !self.name_to_id.contains_key(base_name) {
            return base_name.to_string();
        }
        let mut suffix = 2usize;
        loop {
            let candidate = format!("{base_name}-{suffix}");
            if !self.name_to_id.contains_key(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    pub fn get_vertex(&self, name: &str) -> Option<VertexId> {
        self.name_to_id.get(name).copied()
    }

    /// A cloneable (name, id) handle to a vertex, for call sites that build
    /// edges against vertices by name rather than holding onto a `VertexId`
    /// obtained moments ago from the same `Dag`.
    pub fn vertex_ref(&self, id: VertexId) -> VertexRef {
        VertexRef { id, name: self.vertices[id.index()].name.clone() }
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.index()]
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.index()]
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.iter()
    }

    /// Connects `from`'s output ordinal `from_ordinal` to `to`'s input
    /// ordinal `to_ordinal`, returning the new edge's index.
    ///
    /// Rejects self-edges and ordinal collisions (two edges claiming the
    /// same output ordinal on `from`, or the same input ordinal on `to`).
    pub fn edge(
        &mut self,
        from: VertexId,
        from_ordinal: usize,
        to: VertexId,
        to_ordinal: usize,
    ) -> Result<usize, DagError> {
        if from == to {
            return Err(DagError::SelfEdge { vertex: self.vertex(from).name.clone() });
        }
        if self
            .edges
            .iter()
            .any(|e| e.source() == from && e.source_ordinal() == from_ordinal)
        {
            return Err(DagError::OrdinalInUse {
                vertex: self.vertex(from).name.clone(),
                ordinal: from_ordinal,
                end: EdgeEnd::Source,
            });
        }
        if self
            .edges
            .iter()
            .any(|e| e.destination() == Some(to) && e.dest_ordinal() == to_ordinal)
        {
            return Err(DagError::OrdinalInUse {
                vertex: self.vertex(to).name.clone(),
                ordinal: to_ordinal,
                end: EdgeEnd::Destination,
            });
        }
        let from_name = self.vertex(from).name.clone();
        let to_name = self.vertex(to).name.clone();
        let edge = Edge::from(from, from_name, from_ordinal)
            .to(to, to_name, to_ordinal)
            .expect("a freshly built half-edge never has a destination set yet");
        self.edges.push(edge);
        Ok(self.edges.len() - 1)
    }

    /// Connects two vertices addressed by [`VertexRef`] rather than by a
    /// `VertexId` already known to belong to this `Dag`.
    ///
    /// This is the entry point that can observe `UnknownVertex` (no vertex
    /// of that name exists here at all) and `VertexNameCollision` (a vertex
    /// of that name exists, but it isn't the one `from`/`to` refers to --
    /// e.g. the ref was captured before the vertex was replaced, or against
    /// a different `Dag`). `Dag::edge` cannot observe either: a `VertexId`
    /// obtained from this `Dag` is always exactly the vertex it names.
    pub fn edge_ref(
        &mut self,
        from: &VertexRef,
        from_ordinal: usize,
        to: &VertexRef,
        to_ordinal: usize,
    ) -> Result<usize, DagError> {
        self.resolve_ref(from)?;
        self.resolve_ref(to)?;
        self.edge(from.id, from_ordinal, to.id, to_ordinal)
    }

    fn resolve_ref(&self, r: &VertexRef) -> Result<(), DagError> {
        match self.name_to_id.get(&r.name) {
            None => Err(DagError::UnknownVertex { name: r.name.clone() }),
            Some(&id) if id != r.id => Err(DagError::VertexNameCollision { name: r.name.clone() }),
            Some(_) => Ok(()),
        }
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges whose destination is `vertex`, in the order they were added.
    pub fn inbound_edges(&self, vertex: VertexId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.destination() == Some(vertex)).collect()
    }

    /// Edges whose source is `vertex`, in the order they were added.
    pub fn outbound_edges(&self, vertex: VertexId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source() == vertex).collect()
    }

    /// Returns a topological order of vertex ids, or `CycleDetected` if the
    /// graph has a directed cycle. Uses Tarjan's strongly-connected-components
    /// algorithm; any SCC with more than one vertex is a cycle witness.
    pub fn topological_order(&self) -> Result<Vec<VertexId>, DagError> {
        let n = self.vertices.len();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for e in &self.edges {
            if let Some(dest) = e.destination() {
                adjacency[e.source().index()].push(dest.index());
            }
        }

        let mut index_counter = 0usize;
        let mut indices = vec![None; n];
        let mut low_link = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut sccs: Vec<Vec<usize>> = Vec::new();

        for start in 0..n {
            if indices[start].is_none() {
                self.strong_connect(
                    start,
                    &adjacency,
                    &mut index_counter,
                    &mut indices,
                    &mut low_link,
                    &mut on_stack,
                    &mut stack,
                    &mut sccs,
                );
            }
        }

        for scc in &sccs {
            if scc.len() > 1 {
                let example = &self.vertices[scc[0]].name;
                log::warn!("cycle detected in DAG, involving vertex `{example}`");
                return Err(DagError::CycleDetected { example_vertex: example.clone() });
            }
            // A single-vertex SCC with a self-loop is also a cycle, but
            // self-edges are already rejected at `edge()` time.
        }

        // Tarjan emits SCCs in reverse topological order.
        let mut order = Vec::with_capacity(n);
        for scc in sccs.into_iter().rev() {
            order.push(VertexId::from_raw(scc[0]));
        }
        Ok(order)
    }

    #[allow(clippy::too_many_arguments)]
    fn strong_connect(
        &self,
        v: usize,
        adjacency: &[Vec<usize>],
        index_counter: &mut usize,
        indices: &mut [Option<usize>],
        low_link: &mut [usize],
        on_stack: &mut [bool],
        stack: &mut Vec<usize>,
        sccs: &mut Vec<Vec<usize>>,
    ) {
        indices[v] = Some(*index_counter);
        low_link[v] = *index_counter;
        *index_counter += 1;
        stack.push(v);
        on_stack[v] = true;

        for &w in &adjacency[v] {
            if indices[w].is_none() {
                self.strong_connect(w, adjacency, index_counter, indices, low_link, on_stack, stack, sccs);
                low_link[v] = low_link[v].min(low_link[w]);
            } else if on_stack[w] {
                low_link[v] = low_link[v].min(indices[w].unwrap());
            }
        }

        if low_link[v] == indices[v].unwrap() {
            let mut scc = Vec::new();
            loop {
                let w = stack.pop().unwrap();
                on_stack[w] = false;
                scc.push(w);
                if w == v {
                    break;
                }
            }
            sccs.push(scc);
        }
    }

    /// A deterministic, human-readable dump of the topology: one
    /// `.vertex("name")` line per topologically-sorted vertex (annotated with
    /// `.localParallelism(N)` when it overrides `default_local_parallelism`),
    /// then one `.edge(<edge-expr>)` line per edge in insertion order.
    /// `edge-expr` is `between("a", "b")` when both ordinals are 0, else
    /// `from("a", N).to("b", M)` with `, N`/`, M` omitted when the respective
    /// ordinal is 0.
    pub fn to_string_with_default_parallelism(&self, default_local_parallelism: usize) -> String {
        let mut out = String::new();
        let order = self
            .topological_order()
            .unwrap_or_else(|_| self.vertices.iter().map(|v| v.id).collect());
        for id in order {
            let v = self.vertex(id);
            write!(out, ".vertex(\"{}\")", v.name()).unwrap();
            if let Some(p) = v.local_parallelism() {
                if p != default_local_parallelism {
                    write!(out, ".localParallelism({p})").unwrap();
                }
            }
            writeln!(out).unwrap();
        }
        for e in &self.edges {
            let dest_name = e.dest_name.as_deref().unwrap_or("?");
            let expr = if e.source_ordinal() == 0 && e.dest_ordinal() == 0 {
                format!("between(\"{}\", \"{}\")", e.source_name, dest_name)
            } else {
                let mut s = format!("from(\"{}\"", e.source_name);
                if e.source_ordinal() != 0 {
                    write!(s, ", {}", e.source_ordinal()).unwrap();
                }
                write!(s, ").to(\"{dest_name}\"").unwrap();
                if e.dest_ordinal() != 0 {
                    write!(s, ", {}", e.dest_ordinal()).unwrap();
                }
                s.push(')');
                s
            };
            writeln!(out, ".edge({expr})").unwrap();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DagError;

    #[test]
    fn new_vertex_and_get_vertex_round_trip() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        assert_eq!(dag.get_vertex("a"), Some(a));
        assert_eq!(dag.vertex(a).name(), "a");
    }

    #[test]
    fn duplicate_vertex_name_rejected() {
        let mut dag = Dag::new();
        dag.new_vertex("a").unwrap();
        let err = dag.new_vertex("a").unwrap_err();
        assert_eq!(err, DagError::DuplicateVertex { name: "a".into() });
    }

    #[test]
    fn new_unique_vertex_suffixes_on_collision() {
        let mut dag = Dag::new();
        let a1 = dag.new_unique_vertex("a");
        let a2 = dag.new_unique_vertex("a");
        let a3 = dag.new_unique_vertex("a");
        assert_eq!(dag.vertex(a1).name(), "a");
        assert_eq!(dag.vertex(a2).name(), "a-2");
        assert_eq!(dag.vertex(a3).name(), "a-3");
    }

    #[test]
    fn self_edge_rejected() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let err = dag.edge(a, 0, a, 0).unwrap_err();
        assert_eq!(err, DagError::SelfEdge { vertex: "a".into() });
    }

    #[test]
    fn ordinal_collision_rejected_on_both_ends() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        let c = dag.new_vertex("c").unwrap();
        dag.edge(a, 0, b, 0).unwrap();
        let err = dag.edge(a, 0, c, 0).unwrap_err();
        assert_eq!(
            err,
            DagError::OrdinalInUse { vertex: "a".into(), ordinal: 0, end: EdgeEnd::Source }
        );
        let err = dag.edge(c, 0, b, 0).unwrap_err();
        assert_eq!(
            err,
            DagError::OrdinalInUse { vertex: "b".into(), ordinal: 0, end: EdgeEnd::Destination }
        );
    }

    #[test]
    fn multigraph_allows_parallel_edges_on_distinct_ordinals() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        dag.edge(a, 0, b, 0).unwrap();
        dag.edge(a, 1, b, 1).unwrap();
        assert_eq!(dag.outbound_edges(a).len(), 2);
        assert_eq!(dag.inbound_edges(b).len(), 2);
    }

    #[test]
    fn inbound_and_outbound_edges_preserve_insertion_order() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        let c = dag.new_vertex("c").unwrap();
        dag.edge(a, 0, c, 0).unwrap();
        dag.edge(b, 0, c, 1).unwrap();
        let inbound = dag.inbound_edges(c);
        assert_eq!(inbound[0].source(), a);
        assert_eq!(inbound[1].source(), b);
    }

    #[test]
    fn linear_chain_topological_order() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        let c = dag.new_vertex("c").unwrap();
        dag.edge(b, 0, c, 0).unwrap();
        dag.edge(a, 0, b, 0).unwrap();
        let order = dag.topological_order().unwrap();
        let pos = |id: VertexId| order.iter().position(|&v| v == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn diamond_topological_order() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        let c = dag.new_vertex("c").unwrap();
        let d = dag.new_vertex("d").unwrap();
        dag.edge(a, 0, b, 0).unwrap();
        dag.edge(a, 1, c, 0).unwrap();
        dag.edge(b, 0, d, 0).unwrap();
        dag.edge(c, 0, d, 1).unwrap();
        let order = dag.topological_order().unwrap();
        let pos = |id: VertexId| order.iter().position(|&v| v == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
    }

    #[test]
    fn cycle_is_detected() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        let c = dag.new_vertex("c").unwrap();
        dag.edge(a, 0, b, 0).unwrap();
        dag.edge(b, 0, c, 0).unwrap();
        dag.edge(c, 0, a, 0).unwrap();
        let err = dag.topological_order().unwrap_err();
        assert!(matches!(err, DagError::CycleDetected { .. }));
    }

    #[test]
    fn edge_ref_rejects_unknown_vertex() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let ghost = VertexRef { id: VertexId::from_raw(99), name: "ghost".into() };
        let a_ref = dag.vertex_ref(a);
        let err = dag.edge_ref(&a_ref, 0, &ghost, 0).unwrap_err();
        assert_eq!(err, DagError::UnknownVertex { name: "ghost".into() });
    }

    #[test]
    fn edge_ref_rejects_name_collision() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        let a_ref = dag.vertex_ref(a);
        // A ref naming "b" but carrying a's id: as if captured against a
        // different identity than the one now registered under that name.
        let stale = VertexRef { id: a, name: "b".into() };
        let err = dag.edge_ref(&a_ref, 0, &stale, 0).unwrap_err();
        assert_eq!(err, DagError::VertexNameCollision { name: "b".into() });
        let _ = b;
    }

    #[test]
    fn edge_ref_succeeds_for_matching_refs() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        let a_ref = dag.vertex_ref(a);
        let b_ref = dag.vertex_ref(b);
        dag.edge_ref(&a_ref, 0, &b_ref, 0).unwrap();
        assert_eq!(dag.outbound_edges(a).len(), 1);
    }

    #[test]
    fn to_string_lists_vertices_and_between_edges() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        dag.edge(a, 0, b, 0).unwrap();
        let dump = dag.to_string_with_default_parallelism(4);
        assert!(dump.contains(".vertex(\"a\")"));
        assert!(dump.contains(".vertex(\"b\")"));
        assert!(dump.contains(".edge(between(\"a\", \"b\"))"));
    }

    #[test]
    fn to_string_uses_from_to_when_ordinals_are_nonzero() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        let b = dag.new_vertex("b").unwrap();
        dag.edge(a, 1, b, 2).unwrap();
        let dump = dag.to_string_with_default_parallelism(1);
        assert!(dump.contains(".edge(from(\"a\", 1).to(\"b\", 2))"));
    }

    #[test]
    fn to_string_omits_local_parallelism_matching_default() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a").unwrap();
        dag.vertex_mut(a).set_local_parallelism(8);
        let dump = dag.to_string_with_default_parallelism(4);
        assert!(dump.contains(".vertex(\"a\").localParallelism(8)"));

        let mut dag2 = Dag::new();
        let b = dag2.new_vertex("b").unwrap();
        dag2.vertex_mut(b).set_local_parallelism(4);
        let dump2 = dag2.to_string_with_default_parallelism(4);
        assert!(dump2.contains(".vertex(\"b\")\n"));
        assert!(!dump2.contains("localParallelism"));
    }
}
