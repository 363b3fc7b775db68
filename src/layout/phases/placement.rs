use std::collections::BTreeMap;

use log::debug;

use crate::errors::LayoutError;
use crate::layout::traits::LayoutPhase;
use crate::layout::{PhaseId, PipelineState};
use crate::structure::{ReducedGraph, StructureInfo};
use crate::types::{Id, Layout, LayoutOptions};

/// Phase 4: Sugiyama-style ordering of the reduced graph. Assigns every
/// vertex a row (its topological level) and a column, minimising crossings
/// with a bidirectional barycenter heuristic plus hub centering.
pub struct AbstractPlacer;

impl LayoutPhase for AbstractPlacer {
    fn id(&self) -> PhaseId {
        PhaseId::AbstractPlacement
    }

    fn name(&self) -> &'static str {
        "abstract placement"
    }

    fn description(&self) -> &'static str {
        "Orders reduced-graph rows by bidirectional barycenter"
    }

    fn apply(
        &self,
        layout: &mut Layout,
        state: &mut PipelineState,
        options: &LayoutOptions,
    ) -> Result<(), LayoutError> {
        let structure = &state.structure;
        let reduced = &structure.reduced;
        if reduced.vertices.is_empty() {
            state.rows = Vec::new();
            return Ok(());
        }

        let mut rows = if reduced.edges.is_empty() {
            grid_rows(&reduced.vertices)
        } else {
            initial_rows(reduced, &state.centrality)
        };

        if !reduced.edges.is_empty() {
            for _ in 0..options.max_barycenter_iterations {
                let before = rows.clone();
                forward_pass(&mut rows, reduced, &state.centrality);
                backward_pass(&mut rows, reduced, &state.centrality);
                container_blend(&mut rows, structure, &state.centrality);
                hub_positioning(&mut rows, structure, layout);
                if rows == before {
                    break;
                }
            }
        }

        state.edge_crossings = count_crossings(&rows, reduced);
        debug!(
            "abstract placement: {} rows, {} crossings",
            rows.len(),
            state.edge_crossings
        );
        state.rows = rows;
        Ok(())
    }
}

/// Row-major grid for graphs without edges, in ascending id order
fn grid_rows(vertices: &[Id]) -> Vec<Vec<Id>> {
    let mut sorted: Vec<Id> = vertices.to_vec();
    sorted.sort();
    let per_row = (sorted.len() as f64).sqrt().ceil() as usize;
    sorted
        .chunks(per_row.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Rows by topological level, ordered by descending centrality then id
fn initial_rows(reduced: &ReducedGraph, centrality: &BTreeMap<Id, f64>) -> Vec<Vec<Id>> {
    let row_count = reduced.levels.values().max().map_or(0, |max| max + 1);
    let mut rows: Vec<Vec<Id>> = vec![Vec::new(); row_count];
    for vertex in &reduced.vertices {
        let level = reduced.levels.get(vertex).copied().unwrap_or(0);
        rows[level].push(vertex.clone());
    }
    for row in &mut rows {
        row.sort_by(|a, b| {
            let ca = centrality.get(a).copied().unwrap_or(0.0);
            let cb = centrality.get(b).copied().unwrap_or(0.0);
            cb.partial_cmp(&ca)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
    }
    rows
}

/// Stable sort of one row by the given keys, ties broken by descending
/// centrality then ascending id
fn sort_row(row: &mut Vec<Id>, keys: &[f64], centrality: &BTreeMap<Id, f64>) {
    let mut order: Vec<usize> = (0..row.len()).collect();
    order.sort_by(|&i, &j| {
        keys[i]
            .partial_cmp(&keys[j])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ci = centrality.get(&row[i]).copied().unwrap_or(0.0);
                let cj = centrality.get(&row[j]).copied().unwrap_or(0.0);
                cj.partial_cmp(&ci).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| row[i].cmp(&row[j]))
    });
    *row = order.into_iter().map(|i| row[i].clone()).collect();
}

fn forward_pass(rows: &mut [Vec<Id>], reduced: &ReducedGraph, centrality: &BTreeMap<Id, f64>) {
    for r in 1..rows.len() {
        let prev_cols: BTreeMap<Id, usize> = rows[r - 1]
            .iter()
            .enumerate()
            .map(|(col, v)| (v.clone(), col))
            .collect();
        let keys: Vec<f64> = rows[r]
            .iter()
            .enumerate()
            .map(|(col, vertex)| {
                let preds: Vec<usize> = reduced
                    .predecessors(vertex)
                    .filter_map(|p| prev_cols.get(p).copied())
                    .collect();
                if preds.is_empty() {
                    // No predecessors above: keep the current column
                    col as f64
                } else {
                    preds.iter().sum::<usize>() as f64 / preds.len() as f64
                }
            })
            .collect();
        sort_row(&mut rows[r], &keys, centrality);
    }
}

fn backward_pass(rows: &mut [Vec<Id>], reduced: &ReducedGraph, centrality: &BTreeMap<Id, f64>) {
    for r in (0..rows.len().saturating_sub(1)).rev() {
        let next_cols: BTreeMap<Id, usize> = rows[r + 1]
            .iter()
            .enumerate()
            .map(|(col, v)| (v.clone(), col))
            .collect();
        let keys: Vec<f64> = rows[r]
            .iter()
            .enumerate()
            .map(|(col, vertex)| {
                let succs: Vec<usize> = reduced
                    .successors(vertex)
                    .filter_map(|s| next_cols.get(s).copied())
                    .collect();
                if succs.is_empty() {
                    col as f64
                } else {
                    succs.iter().sum::<usize>() as f64 / succs.len() as f64
                }
            })
            .collect();
        sort_row(&mut rows[r], &keys, centrality);
    }
}

/// Bias cluster vertices fed from within their own row toward the row
/// centre: blend the mean source column 50/50 with the geometric centre
fn container_blend(rows: &mut [Vec<Id>], structure: &StructureInfo, centrality: &BTreeMap<Id, f64>) {
    for row in rows.iter_mut() {
        let n = row.len();
        if n < 2 {
            continue;
        }
        let mut keys: Vec<f64> = (0..n).map(|col| col as f64).collect();
        let mut changed = false;
        for (col, vertex) in row.iter().enumerate() {
            if structure.virtual_container(vertex).is_none() {
                continue;
            }
            let sources: Vec<usize> = row
                .iter()
                .enumerate()
                .filter(|(_, u)| {
                    *u != vertex
                        && structure
                            .reduced
                            .edges
                            .contains(&((*u).clone(), vertex.clone()))
                })
                .map(|(u_col, _)| u_col)
                .collect();
            if sources.is_empty() {
                continue;
            }
            let mean = sources.iter().sum::<usize>() as f64 / sources.len() as f64;
            keys[col] = 0.5 * mean + 0.5 * (n - 1) as f64 / 2.0;
            changed = true;
        }
        if changed {
            sort_row(row, &keys, centrality);
        }
    }
}

/// Pin hub containers (fed by two or more distinct same-row sources) to
/// the centre of rows of three or more
fn hub_positioning(rows: &mut [Vec<Id>], structure: &StructureInfo, layout: &Layout) {
    for row in rows.iter_mut() {
        if row.len() < 3 {
            continue;
        }
        let hubs: Vec<Id> = row
            .iter()
            .filter(|vertex| {
                is_container_vertex(vertex, structure, layout)
                    && same_row_source_count(vertex, row, &structure.reduced) >= 2
            })
            .cloned()
            .collect();
        let centre = row.len() / 2;
        for hub in hubs {
            if let Some(from) = row.iter().position(|v| *v == hub) {
                row.remove(from);
                row.insert(centre.min(row.len()), hub);
            }
        }
    }
}

fn is_container_vertex(vertex: &str, structure: &StructureInfo, layout: &Layout) -> bool {
    structure.virtual_container(vertex).is_some()
        || layout.element(vertex).map_or(false, |e| e.is_container())
}

fn same_row_source_count(vertex: &str, row: &[Id], reduced: &ReducedGraph) -> usize {
    row.iter()
        .filter(|u| u.as_str() != vertex && reduced.edges.contains(&((*u).clone(), vertex.to_string())))
        .count()
}

/// Counterclockwise orientation of the triangle (a, b, c)
fn ccw(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn segments_cross(p1: (f64, f64), p2: (f64, f64), q1: (f64, f64), q2: (f64, f64)) -> bool {
    ccw(p1, p2, q1) * ccw(p1, p2, q2) < 0.0 && ccw(q1, q2, p1) * ccw(q1, q2, p2) < 0.0
}

/// Straight-segment crossings between edges on the (col, row) grid. Purely
/// diagnostic; the result feeds the report, not the layout.
fn count_crossings(rows: &[Vec<Id>], reduced: &ReducedGraph) -> usize {
    let mut positions: BTreeMap<&Id, (f64, f64)> = BTreeMap::new();
    for (r, row) in rows.iter().enumerate() {
        for (col, vertex) in row.iter().enumerate() {
            positions.insert(vertex, (col as f64, r as f64));
        }
    }

    let segments: Vec<(&Id, &Id, (f64, f64), (f64, f64))> = reduced
        .edges
        .iter()
        .filter_map(|(from, to)| {
            let p1 = positions.get(from)?;
            let p2 = positions.get(to)?;
            Some((from, to, *p1, *p2))
        })
        .collect();

    let mut crossings = 0;
    for (i, a) in segments.iter().enumerate() {
        for b in segments.iter().skip(i + 1) {
            if a.0 == b.0 || a.0 == b.1 || a.1 == b.0 || a.1 == b.1 {
                continue;
            }
            if segments_cross(a.2, a.3, b.2, b.3) {
                crossings += 1;
            }
        }
    }
    crossings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::phases::centrality::CentralityOrdering;
    use crate::layout::phases::structure::StructureAnalyzer;
    use crate::types::{Connection, Element};

    fn run_placement(layout: &mut Layout) -> PipelineState {
        let options = LayoutOptions::default();
        let mut state = PipelineState::default();
        StructureAnalyzer.apply(layout, &mut state, &options).unwrap();
        CentralityOrdering.apply(layout, &mut state, &options).unwrap();
        AbstractPlacer.apply(layout, &mut state, &options).unwrap();
        state
    }

    #[test]
    fn test_diamond_has_no_crossings() {
        let mut layout = Layout::new();
        for id in ["a", "b", "c", "d"] {
            layout.add_element(Element::new(id));
        }
        for (from, to) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")] {
            layout.add_connection(Connection::new(from, to));
        }

        let state = run_placement(&mut layout);
        assert_eq!(state.rows.len(), 3);
        assert_eq!(state.rows[0], vec!["a".to_string()]);
        assert_eq!(state.rows[1].len(), 2);
        assert_eq!(state.rows[2], vec!["d".to_string()]);
        assert_eq!(state.edge_crossings, 0);
    }

    #[test]
    fn test_hub_container_pinned_to_row_centre() {
        let mut layout = Layout::new();
        layout.add_element(Element::new("x"));
        layout.add_element(Element::new("a"));
        layout.add_element(Element::new("b"));
        layout.add_element(Element::new("c"));
        layout.add_element(
            Element::new("hub")
                .with_child("a")
                .with_child("b")
                .with_child("c"),
        );
        layout.add_element(Element::new("y"));
        for (from, to) in [("x", "a"), ("x", "b"), ("y", "a"), ("y", "c")] {
            layout.add_connection(Connection::new(from, to));
        }

        let state = run_placement(&mut layout);
        assert_eq!(state.rows.len(), 1);
        assert_eq!(state.rows[0].len(), 3);
        assert_eq!(state.rows[0][1], "hub");
    }

    #[test]
    fn test_edgeless_graph_falls_back_to_grid() {
        let mut layout = Layout::new();
        for id in ["e", "c", "a", "d", "b"] {
            layout.add_element(Element::new(id));
        }

        let state = run_placement(&mut layout);
        // ceil(sqrt(5)) = 3 per row, ascending id, row-major
        assert_eq!(state.rows.len(), 2);
        assert_eq!(
            state.rows[0],
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(state.rows[1], vec!["d".to_string(), "e".to_string()]);
    }

    #[test]
    fn test_crossing_counter_sees_swap() {
        let mut layout = Layout::new();
        for id in ["a", "b", "c", "d"] {
            layout.add_element(Element::new(id));
        }
        // a and b above, crossing into d and c
        layout.add_connection(Connection::new("a", "d"));
        layout.add_connection(Connection::new("b", "c"));

        let state = run_placement(&mut layout);
        // The barycenter passes untangle the single crossing
        assert_eq!(state.edge_crossings, 0);
    }

    #[test]
    fn test_placement_is_idempotent() {
        let mut layout = Layout::new();
        for id in ["a", "b", "c", "d", "e"] {
            layout.add_element(Element::new(id));
        }
        for (from, to) in [("a", "c"), ("b", "c"), ("c", "d"), ("c", "e")] {
            layout.add_connection(Connection::new(from, to));
        }

        let first = run_placement(&mut layout).rows;
        let second = run_placement(&mut layout).rows;
        assert_eq!(first, second);
    }
}
