use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::Id;

/// Containment record for a single element
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TreeNode {
    pub is_container: bool,
    pub children: Vec<Id>,
    pub parent: Option<Id>,
    pub depth: usize,
}

/// Cluster of primary elements that behaves as one vertex between the
/// structure and expansion phases. Never persisted into the output layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualContainer {
    pub id: Id,
    /// Member ids, sorted
    pub members: Vec<Id>,
    /// The single member receiving all external incoming edges
    pub anchor: Id,
    /// The single member originating external outgoing edges, if any exist
    pub exit: Option<Id>,
}

impl VirtualContainer {
    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }
}

/// The reduced primary graph: non-clustered primaries plus one vertex per
/// virtual container, with edges induced by endpoint projection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReducedGraph {
    /// Vertex ids in a deterministic order
    pub vertices: Vec<Id>,
    pub edges: BTreeSet<(Id, Id)>,
    /// Edges that participate in topological leveling (a subset of `edges`)
    pub leveling_edges: BTreeSet<(Id, Id)>,
    /// Topological level per vertex
    pub levels: BTreeMap<Id, usize>,
    /// Primary element id -> owning virtual container id
    pub membership: BTreeMap<Id, Id>,
}

impl ReducedGraph {
    /// Vertex a primary element is represented by
    pub fn vertex_for<'a>(&'a self, primary: &'a str) -> &'a str {
        self.membership.get(primary).map_or(primary, |vc| vc.as_str())
    }

    pub fn predecessors<'a>(&'a self, vertex: &'a str) -> impl Iterator<Item = &'a Id> + 'a {
        self.edges
            .iter()
            .filter(move |(_, t)| t == vertex)
            .map(|(s, _)| s)
    }

    pub fn successors<'a>(&'a self, vertex: &'a str) -> impl Iterator<Item = &'a Id> + 'a {
        self.edges
            .iter()
            .filter(move |(s, _)| s == vertex)
            .map(|(_, t)| t)
    }
}

/// Derived structural information, read-mostly after the analysis phase
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StructureInfo {
    pub element_tree: BTreeMap<Id, TreeNode>,
    /// Elements not contained in any other, in document order
    pub primary_elements: Vec<Id>,
    /// Topological level per primary element
    pub topological_levels: BTreeMap<Id, usize>,
    /// Degree-weighted importance per element
    pub accessibility_scores: BTreeMap<Id, f64>,
    pub virtual_containers: Vec<VirtualContainer>,
    /// Connections projected onto primary elements, deduplicated
    pub primary_edges: BTreeSet<(Id, Id)>,
    /// Primary edges that participate in topological leveling
    pub primary_leveling_edges: BTreeSet<(Id, Id)>,
    pub reduced: ReducedGraph,
}

impl StructureInfo {
    /// Outermost ancestor of an element that is itself primary
    pub fn outermost_primary<'a>(&'a self, id: &'a str) -> &'a str {
        let mut current = id;
        while let Some(parent) = self
            .element_tree
            .get(current)
            .and_then(|node| node.parent.as_deref())
        {
            current = parent;
        }
        current
    }

    pub fn is_primary(&self, id: &str) -> bool {
        self.element_tree
            .get(id)
            .map_or(false, |node| node.parent.is_none())
    }

    pub fn virtual_container(&self, vc_id: &str) -> Option<&VirtualContainer> {
        self.virtual_containers.iter().find(|vc| vc.id == vc_id)
    }

    /// Ids of all descendants of an element, depth first
    pub fn descendants<'a>(&'a self, id: &str) -> Vec<&'a Id> {
        let mut out = Vec::new();
        let mut stack: Vec<&Id> = match self.element_tree.get(id) {
            Some(node) => node.children.iter().rev().collect(),
            None => return out,
        };
        while let Some(child) = stack.pop() {
            out.push(child);
            if let Some(node) = self.element_tree.get(child) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }
}
