use log::warn;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::errors::{LayoutError, LayoutWarning};
use crate::layout::traits::LayoutPhase;
use crate::layout::{PhaseId, PipelineState};
use crate::structure::{ReducedGraph, StructureInfo, TreeNode, VirtualContainer};
use crate::types::{Id, Layout, LayoutOptions};

/// Weight of the containment subtree size in the accessibility score
const SUBTREE_WEIGHT: f64 = 0.25;

/// Phase 1: containment forest, topological levels, accessibility scores,
/// virtual containers and the reduced primary graph.
pub struct StructureAnalyzer;

impl LayoutPhase for StructureAnalyzer {
    fn id(&self) -> PhaseId {
        PhaseId::StructureAnalysis
    }

    fn name(&self) -> &'static str {
        "structure analysis"
    }

    fn description(&self) -> &'static str {
        "Derives the containment forest, topological levels and the reduced primary graph"
    }

    fn apply(
        &self,
        layout: &mut Layout,
        state: &mut PipelineState,
        _options: &LayoutOptions,
    ) -> Result<(), LayoutError> {
        let (structure, warnings) = analyze(layout)?;
        state.structure = structure;
        state.warnings.extend(warnings);
        Ok(())
    }
}

/// Analyze a layout without running the rest of the pipeline
pub fn analyze(layout: &Layout) -> Result<(StructureInfo, Vec<LayoutWarning>), LayoutError> {
    let mut warnings = Vec::new();

    // Step 1: containment forest
    let element_tree = build_element_tree(layout)?;

    let primary_elements: Vec<Id> = layout
        .elements
        .keys()
        .filter(|id| element_tree[*id].parent.is_none())
        .cloned()
        .collect();
    if primary_elements.is_empty() {
        return Err(LayoutError::EmptyGraph);
    }

    // Step 2: project connections onto primary elements. Edges whose
    // original target is a contained element are lateral: they order rows
    // but do not push the target's container to a deeper level.
    let mut primary_edges: BTreeSet<(Id, Id)> = BTreeSet::new();
    let mut primary_leveling_edges: BTreeSet<(Id, Id)> = BTreeSet::new();
    let mut in_degree: BTreeMap<Id, usize> = BTreeMap::new();
    let mut out_degree: BTreeMap<Id, usize> = BTreeMap::new();
    for connection in &layout.connections {
        let known = layout.elements.contains_key(&connection.from)
            && layout.elements.contains_key(&connection.to);
        if !known {
            warn!(
                "dropping connection {} -> {}: unknown endpoint",
                connection.from, connection.to
            );
            warnings.push(LayoutWarning::DanglingConnection {
                from: connection.from.clone(),
                to: connection.to.clone(),
            });
            continue;
        }

        *out_degree.entry(connection.from.clone()).or_insert(0) += 1;
        *in_degree.entry(connection.to.clone()).or_insert(0) += 1;

        let from_primary = outermost(&element_tree, &connection.from).clone();
        let to_primary = outermost(&element_tree, &connection.to).clone();
        if from_primary == to_primary {
            continue;
        }
        if element_tree[&connection.to].parent.is_none() {
            primary_leveling_edges.insert((from_primary.clone(), to_primary.clone()));
        }
        primary_edges.insert((from_primary, to_primary));
    }

    // Step 3: topological levels over primaries, cycles collapsed
    let topological_levels = condensation_levels(&primary_elements, &primary_leveling_edges);

    // Step 4: accessibility scores per element
    let mut accessibility_scores = BTreeMap::new();
    for id in layout.elements.keys() {
        let degree = (in_degree.get(id).copied().unwrap_or(0)
            + out_degree.get(id).copied().unwrap_or(0)) as f64;
        let subtree = subtree_size(&element_tree, id) as f64;
        accessibility_scores.insert(id.clone(), degree + SUBTREE_WEIGHT * subtree);
    }

    // Step 5: virtual containers over the primary graph
    let virtual_containers = detect_virtual_containers(&primary_elements, &primary_edges);

    // Step 6: the reduced primary graph and its levels
    let mut membership = BTreeMap::new();
    for vc in &virtual_containers {
        for member in &vc.members {
            membership.insert(member.clone(), vc.id.clone());
        }
    }

    let mut vertices: Vec<Id> = primary_elements
        .iter()
        .filter(|id| !membership.contains_key(*id))
        .cloned()
        .collect();
    vertices.extend(virtual_containers.iter().map(|vc| vc.id.clone()));

    let mut edges = BTreeSet::new();
    let mut leveling_edges = BTreeSet::new();
    for (from, to) in &primary_edges {
        let from_vertex = membership.get(from).unwrap_or(from).clone();
        let to_vertex = membership.get(to).unwrap_or(to).clone();
        if from_vertex == to_vertex {
            continue;
        }
        if primary_leveling_edges.contains(&(from.clone(), to.clone())) {
            leveling_edges.insert((from_vertex.clone(), to_vertex.clone()));
        }
        edges.insert((from_vertex, to_vertex));
    }

    let levels = condensation_levels(&vertices, &leveling_edges);
    let reduced = ReducedGraph {
        vertices,
        edges,
        leveling_edges,
        levels,
        membership,
    };

    Ok((
        StructureInfo {
            element_tree,
            primary_elements,
            topological_levels,
            accessibility_scores,
            virtual_containers,
            primary_edges,
            primary_leveling_edges,
            reduced,
        },
        warnings,
    ))
}

fn build_element_tree(layout: &Layout) -> Result<BTreeMap<Id, TreeNode>, LayoutError> {
    let mut tree: BTreeMap<Id, TreeNode> = layout
        .elements
        .iter()
        .map(|(id, element)| {
            (
                id.clone(),
                TreeNode {
                    is_container: element.is_container(),
                    children: Vec::new(),
                    parent: None,
                    depth: 0,
                },
            )
        })
        .collect();

    for (id, element) in &layout.elements {
        let mut seen = BTreeSet::new();
        for child in &element.contains {
            if !tree.contains_key(child) {
                return Err(LayoutError::UnknownElement {
                    id: child.clone(),
                    referrer: id.clone(),
                });
            }
            // A repeated child entry is an idempotent re-parent
            if !seen.insert(child.clone()) {
                continue;
            }
            if let Some(node) = tree.get_mut(child) {
                match &node.parent {
                    Some(existing) if existing == id => {}
                    Some(existing) => {
                        return Err(LayoutError::MultipleParents {
                            child: child.clone(),
                            first: existing.clone(),
                            second: id.clone(),
                        });
                    }
                    None => node.parent = Some(id.clone()),
                }
            }
            if let Some(node) = tree.get_mut(id) {
                node.children.push(child.clone());
            }
        }
    }

    // Depths; a parent chain longer than the element count is a cycle
    let ids: Vec<Id> = tree.keys().cloned().collect();
    let limit = ids.len();
    for id in &ids {
        let mut depth = 0;
        let mut current = id.clone();
        while let Some(parent) = tree[&current].parent.clone() {
            depth += 1;
            if depth > limit {
                return Err(LayoutError::ContainmentCycle { id: id.clone() });
            }
            current = parent;
        }
        if let Some(node) = tree.get_mut(id) {
            node.depth = depth;
        }
    }

    Ok(tree)
}

fn outermost<'a>(tree: &'a BTreeMap<Id, TreeNode>, id: &'a Id) -> &'a Id {
    let mut current = id;
    while let Some(parent) = tree.get(current).and_then(|node| node.parent.as_ref()) {
        current = parent;
    }
    current
}

fn subtree_size(tree: &BTreeMap<Id, TreeNode>, id: &Id) -> usize {
    let mut count = 0;
    let mut stack: Vec<&Id> = match tree.get(id) {
        Some(node) => node.children.iter().collect(),
        None => return 0,
    };
    while let Some(child) = stack.pop() {
        count += 1;
        if let Some(node) = tree.get(child) {
            stack.extend(node.children.iter());
        }
    }
    count
}

/// Longest-path levels on the condensation of the given graph. Members of
/// a strongly connected component all receive the component's level.
pub(crate) fn condensation_levels(
    vertices: &[Id],
    edges: &BTreeSet<(Id, Id)>,
) -> BTreeMap<Id, usize> {
    let index_of: BTreeMap<&Id, usize> = vertices.iter().enumerate().map(|(i, v)| (v, i)).collect();
    let n = vertices.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (from, to) in edges {
        if let (Some(&f), Some(&t)) = (index_of.get(from), index_of.get(to)) {
            successors[f].push(t);
        }
    }

    // Iterative Tarjan; components complete in reverse topological order
    const UNVISITED: usize = usize::MAX;
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![UNVISITED; n];
    let mut on_stack = vec![false; n];
    let mut component_of = vec![UNVISITED; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut next_index = 0;

    struct Frame {
        vertex: usize,
        child: usize,
    }

    for start in 0..n {
        if index[start] != UNVISITED {
            continue;
        }
        let mut call_stack = vec![Frame {
            vertex: start,
            child: 0,
        }];
        while let Some(frame) = call_stack.last_mut() {
            let v = frame.vertex;
            if index[v] == UNVISITED {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if frame.child < successors[v].len() {
                let w = successors[v][frame.child];
                frame.child += 1;
                if index[w] == UNVISITED {
                    call_stack.push(Frame {
                        vertex: w,
                        child: 0,
                    });
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component_of[w] = components.len();
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    components.push(component);
                }
                call_stack.pop();
                if let Some(parent) = call_stack.last() {
                    lowlink[parent.vertex] = lowlink[parent.vertex].min(lowlink[v]);
                }
            }
        }
    }

    // Component predecessors; edge targets always live in earlier-indexed
    // components, so descending component order is topological
    let mut component_preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    for (from, to) in edges {
        if let (Some(&f), Some(&t)) = (index_of.get(from), index_of.get(to)) {
            let (cf, ct) = (component_of[f], component_of[t]);
            if cf != ct {
                component_preds[ct].insert(cf);
            }
        }
    }

    let mut component_level = vec![0usize; components.len()];
    for c in (0..components.len()).rev() {
        component_level[c] = component_preds[c]
            .iter()
            .map(|&p| component_level[p] + 1)
            .max()
            .unwrap_or(0);
    }

    let mut levels = BTreeMap::new();
    for (v, vertex) in vertices.iter().enumerate() {
        levels.insert(vertex.clone(), component_level[component_of[v]]);
    }
    levels
}

/// Detect tight-family clusters: grow a candidate from each seed as its
/// forward-reachable set plus absorbed feeders, then keep the largest
/// eligible set until no candidates remain.
fn detect_virtual_containers(
    primaries: &[Id],
    edges: &BTreeSet<(Id, Id)>,
) -> Vec<VirtualContainer> {
    let mut consumed: BTreeSet<Id> = BTreeSet::new();
    let mut containers = Vec::new();

    loop {
        let active: BTreeSet<&Id> = primaries.iter().filter(|id| !consumed.contains(*id)).collect();
        let mut best: Option<(BTreeSet<Id>, Id, Option<Id>)> = None;

        for seed in &active {
            let candidate = grow_candidate(seed, &active, edges);
            if candidate.len() < 3 || !is_connected(&candidate, edges) {
                continue;
            }
            let Some((anchor, exit)) = eligibility(&candidate, edges) else {
                continue;
            };
            let replace = match &best {
                None => true,
                Some((current, _, _)) => {
                    candidate.len() > current.len()
                        || (candidate.len() == current.len()
                            && candidate.iter().next() < current.iter().next())
                }
            };
            if replace {
                best = Some((candidate, anchor, exit));
            }
        }

        let Some((members, anchor, exit)) = best else {
            break;
        };
        consumed.extend(members.iter().cloned());
        containers.push(VirtualContainer {
            id: format!("_toi_vc_{}", containers.len()),
            members: members.into_iter().collect(),
            anchor,
            exit,
        });
    }

    containers
}

/// Forward-reachable set of the seed, then a closure step absorbing
/// co-feeders: vertices whose every outgoing edge targets an interior
/// member (not the seed itself) and which receive nothing from outside the
/// set. Feeders of the seed stay outside so the seed keeps its external
/// incoming edges and can act as the anchor.
fn grow_candidate(seed: &Id, active: &BTreeSet<&Id>, edges: &BTreeSet<(Id, Id)>) -> BTreeSet<Id> {
    let mut set: BTreeSet<Id> = BTreeSet::new();
    let mut queue: VecDeque<&Id> = VecDeque::new();
    set.insert(seed.clone());
    queue.push_back(seed);
    while let Some(current) = queue.pop_front() {
        for (from, to) in edges {
            if from == current && active.contains(to) && set.insert(to.clone()) {
                if let Some(&next) = active.get(to) {
                    queue.push_back(next);
                }
            }
        }
    }

    loop {
        let mut absorbed = None;
        for &vertex in active.iter() {
            if set.contains(vertex) {
                continue;
            }
            let outs: Vec<&Id> = edges
                .iter()
                .filter(|(from, _)| from == vertex)
                .map(|(_, to)| to)
                .collect();
            let feeds_interior =
                !outs.is_empty() && outs.iter().all(|to| *to != seed && set.contains(*to));
            let externally_fed = edges
                .iter()
                .any(|(from, to)| to == vertex && !set.contains(from));
            if feeds_interior && !externally_fed {
                absorbed = Some(vertex.clone());
                break;
            }
        }
        match absorbed {
            Some(vertex) => {
                set.insert(vertex);
            }
            None => break,
        }
    }

    set
}

/// A candidate is eligible when all external incoming edges (at least one)
/// share a single target and all external outgoing edges share a single
/// source. Returns (anchor, exit).
fn eligibility(set: &BTreeSet<Id>, edges: &BTreeSet<(Id, Id)>) -> Option<(Id, Option<Id>)> {
    let mut in_targets = BTreeSet::new();
    let mut out_sources = BTreeSet::new();
    for (from, to) in edges {
        match (set.contains(from), set.contains(to)) {
            (false, true) => {
                in_targets.insert(to.clone());
            }
            (true, false) => {
                out_sources.insert(from.clone());
            }
            _ => {}
        }
    }
    if in_targets.len() != 1 || out_sources.len() > 1 {
        return None;
    }
    let anchor = in_targets.into_iter().next()?;
    Some((anchor, out_sources.into_iter().next()))
}

fn is_connected(set: &BTreeSet<Id>, edges: &BTreeSet<(Id, Id)>) -> bool {
    let Some(start) = set.iter().next() else {
        return false;
    };
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start.clone());
    queue.push_back(start.clone());
    while let Some(current) = queue.pop_front() {
        for (from, to) in edges {
            let neighbour = if *from == current && set.contains(to) {
                to
            } else if *to == current && set.contains(from) {
                from
            } else {
                continue;
            };
            if visited.insert(neighbour.clone()) {
                queue.push_back(neighbour.clone());
            }
        }
    }
    visited.len() == set.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Connection, Element};

    fn layout_with(elements: &[Element], connections: &[(&str, &str)]) -> Layout {
        let mut layout = Layout::new();
        for element in elements {
            layout.add_element(element.clone());
        }
        for (from, to) in connections {
            layout.add_connection(Connection::new(*from, *to));
        }
        layout
    }

    #[test]
    fn test_multiple_parents_rejected() {
        let layout = layout_with(
            &[
                Element::new("a"),
                Element::new("p").with_child("a"),
                Element::new("q").with_child("a"),
            ],
            &[],
        );
        let err = analyze(&layout).unwrap_err();
        assert!(matches!(err, LayoutError::MultipleParents { .. }));
    }

    #[test]
    fn test_duplicate_child_entry_tolerated() {
        let layout = layout_with(
            &[Element::new("a"), Element::new("p").with_child("a").with_child("a")],
            &[],
        );
        let (structure, _) = analyze(&layout).unwrap();
        assert_eq!(structure.element_tree["p"].children, vec!["a".to_string()]);
    }

    #[test]
    fn test_containment_cycle_rejected() {
        let layout = layout_with(
            &[
                Element::new("a").with_child("b"),
                Element::new("b").with_child("a"),
            ],
            &[],
        );
        let err = analyze(&layout).unwrap_err();
        assert!(matches!(err, LayoutError::ContainmentCycle { .. }));
    }

    #[test]
    fn test_unknown_contained_element_rejected() {
        let layout = layout_with(&[Element::new("p").with_child("ghost")], &[]);
        let err = analyze(&layout).unwrap_err();
        assert!(matches!(err, LayoutError::UnknownElement { .. }));
    }

    #[test]
    fn test_dangling_connection_dropped_with_warning() {
        let layout = layout_with(&[Element::new("a")], &[("a", "ghost")]);
        let (structure, warnings) = analyze(&layout).unwrap();
        assert!(structure.primary_edges.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            LayoutWarning::DanglingConnection { .. }
        ));
    }

    #[test]
    fn test_chain_levels() {
        let layout = layout_with(
            &[Element::new("a"), Element::new("b"), Element::new("c")],
            &[("a", "b"), ("b", "c")],
        );
        let (structure, _) = analyze(&layout).unwrap();
        assert_eq!(structure.topological_levels["a"], 0);
        assert_eq!(structure.topological_levels["b"], 1);
        assert_eq!(structure.topological_levels["c"], 2);
    }

    #[test]
    fn test_cycle_members_share_level() {
        let layout = layout_with(
            &[Element::new("a"), Element::new("b"), Element::new("c")],
            &[("a", "b"), ("b", "c"), ("c", "a")],
        );
        let (structure, _) = analyze(&layout).unwrap();
        assert_eq!(structure.topological_levels["a"], 0);
        assert_eq!(structure.topological_levels["b"], 0);
        assert_eq!(structure.topological_levels["c"], 0);
    }

    #[test]
    fn test_edges_into_contained_elements_are_lateral() {
        // x and y feed children of the container, so all three primaries
        // stay on one level while the reduced graph still records the edges
        let layout = layout_with(
            &[
                Element::new("x"),
                Element::new("a"),
                Element::new("b"),
                Element::new("box").with_child("a").with_child("b"),
                Element::new("y"),
            ],
            &[("x", "a"), ("x", "b"), ("y", "a")],
        );
        let (structure, _) = analyze(&layout).unwrap();
        assert_eq!(structure.topological_levels["x"], 0);
        assert_eq!(structure.topological_levels["box"], 0);
        assert_eq!(structure.topological_levels["y"], 0);
        assert!(structure
            .reduced
            .edges
            .contains(&("x".to_string(), "box".to_string())));
        assert!(structure
            .reduced
            .edges
            .contains(&("y".to_string(), "box".to_string())));
        assert!(structure.reduced.leveling_edges.is_empty());
    }

    #[test]
    fn test_accessibility_monotone_in_degree() {
        let layout = layout_with(
            &[Element::new("hub"), Element::new("a"), Element::new("b")],
            &[("a", "hub"), ("b", "hub"), ("hub", "a")],
        );
        let (structure, _) = analyze(&layout).unwrap();
        assert!(structure.accessibility_scores["hub"] > structure.accessibility_scores["b"]);
    }

    #[test]
    fn test_virtual_container_detection() {
        let layout = layout_with(
            &[
                Element::new("p"),
                Element::new("r"),
                Element::new("u"),
                Element::new("d1"),
                Element::new("d2"),
                Element::new("d3"),
                Element::new("ext"),
            ],
            &[
                ("p", "u"),
                ("r", "u"),
                ("u", "d1"),
                ("u", "d2"),
                ("u", "d3"),
                ("ext", "p"),
            ],
        );
        let (structure, _) = analyze(&layout).unwrap();

        assert_eq!(structure.virtual_containers.len(), 1);
        let vc = &structure.virtual_containers[0];
        assert_eq!(vc.id, "_toi_vc_0");
        assert_eq!(vc.anchor, "p");
        assert_eq!(vc.exit, None);
        assert_eq!(
            vc.members,
            vec!["d1", "d2", "d3", "p", "r", "u"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );

        // Reduced graph: the cluster vertex plus ext, one edge between them
        assert_eq!(structure.reduced.vertices.len(), 2);
        assert!(structure
            .reduced
            .edges
            .contains(&("ext".to_string(), "_toi_vc_0".to_string())));
        assert_eq!(structure.reduced.levels["ext"], 0);
        assert_eq!(structure.reduced.levels["_toi_vc_0"], 1);
    }

    #[test]
    fn test_no_virtual_container_in_diamond() {
        let layout = layout_with(
            &[
                Element::new("a"),
                Element::new("b"),
                Element::new("c"),
                Element::new("d"),
            ],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let (structure, _) = analyze(&layout).unwrap();
        assert!(structure.virtual_containers.is_empty());
        assert_eq!(structure.reduced.vertices.len(), 4);
    }

    #[test]
    fn test_empty_graph_rejected() {
        let layout = Layout::new();
        assert_eq!(analyze(&layout).unwrap_err(), LayoutError::EmptyGraph);
    }
}
