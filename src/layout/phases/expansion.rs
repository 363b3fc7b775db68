use std::collections::BTreeMap;

use crate::errors::LayoutError;
use crate::layout::phases::structure::condensation_levels;
use crate::layout::traits::LayoutPhase;
use crate::layout::{PhaseId, PipelineState};
use crate::types::{Id, Layout, LayoutOptions};

/// Horizontal spacing between cluster members, in abstract units
const MEMBER_SPACING: f64 = 0.4;

/// Phase 5.5: expand the reduced placement to every primary element.
/// Cluster members fan out below their cluster's position, grouped by the
/// topological sub-levels of the member-induced subgraph.
pub struct NdprExpander;

impl LayoutPhase for NdprExpander {
    fn id(&self) -> PhaseId {
        PhaseId::Expansion
    }

    fn name(&self) -> &'static str {
        "expansion"
    }

    fn description(&self) -> &'static str {
        "Expands reduced-graph positions to concrete elements"
    }

    fn apply(
        &self,
        layout: &mut Layout,
        state: &mut PipelineState,
        _options: &LayoutOptions,
    ) -> Result<(), LayoutError> {
        let structure = &state.structure;
        layout.abstract_positions.clear();

        for (r, row) in state.rows.iter().enumerate() {
            for vertex in row {
                let x = state.x_offsets.get(vertex).copied().unwrap_or(0.0);
                match structure.virtual_container(vertex) {
                    None => {
                        layout
                            .abstract_positions
                            .insert(vertex.clone(), (x, r as f64));
                    }
                    Some(vc) => {
                        // Sub-levels on the subgraph induced by the members
                        let internal: std::collections::BTreeSet<(Id, Id)> = structure
                            .primary_edges
                            .iter()
                            .filter(|(from, to)| vc.contains(from) && vc.contains(to))
                            .cloned()
                            .collect();
                        let sub_levels = condensation_levels(&vc.members, &internal);

                        let mut groups: BTreeMap<usize, Vec<&Id>> = BTreeMap::new();
                        for member in &vc.members {
                            let level = sub_levels.get(member).copied().unwrap_or(0);
                            groups.entry(level).or_default().push(member);
                        }
                        for (level, members) in &groups {
                            let y = r as f64 + *level as f64;
                            let span = (members.len() - 1) as f64 * MEMBER_SPACING;
                            for (i, member) in members.iter().enumerate() {
                                let member_x = x - span / 2.0 + i as f64 * MEMBER_SPACING;
                                layout
                                    .abstract_positions
                                    .insert((*member).clone(), (member_x, y));
                            }
                        }
                    }
                }
            }
        }

        layout.optimized_layer_order = rebuild_layer_order(&layout.abstract_positions);
        Ok(())
    }
}

/// Group expanded elements into rows by the integer part of their abstract
/// y, ordered left to right
fn rebuild_layer_order(positions: &BTreeMap<Id, (f64, f64)>) -> Vec<Vec<Id>> {
    let mut grouped: BTreeMap<i64, Vec<(f64, &Id)>> = BTreeMap::new();
    for (id, (x, y)) in positions {
        grouped.entry(y.floor() as i64).or_default().push((*x, id));
    }
    grouped
        .into_values()
        .map(|mut row| {
            row.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(b.1))
            });
            row.into_iter().map(|(_, id)| id.clone()).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::phases::bisection::PositionOptimizer;
    use crate::layout::phases::centrality::CentralityOrdering;
    use crate::layout::phases::placement::AbstractPlacer;
    use crate::layout::phases::structure::StructureAnalyzer;
    use crate::types::{Connection, Element};

    fn run_through_expansion(layout: &mut Layout) -> PipelineState {
        let options = LayoutOptions::default();
        let mut state = PipelineState::default();
        StructureAnalyzer.apply(layout, &mut state, &options).unwrap();
        CentralityOrdering.apply(layout, &mut state, &options).unwrap();
        AbstractPlacer.apply(layout, &mut state, &options).unwrap();
        PositionOptimizer.apply(layout, &mut state, &options).unwrap();
        NdprExpander.apply(layout, &mut state, &options).unwrap();
        state
    }

    #[test]
    fn test_one_abstract_position_per_primary() {
        let mut layout = Layout::new();
        for id in ["p", "r", "u", "d1", "d2", "d3", "ext"] {
            layout.add_element(Element::new(id));
        }
        for (from, to) in [
            ("p", "u"),
            ("r", "u"),
            ("u", "d1"),
            ("u", "d2"),
            ("u", "d3"),
            ("ext", "p"),
        ] {
            layout.add_connection(Connection::new(from, to));
        }

        let state = run_through_expansion(&mut layout);
        assert_eq!(
            layout.abstract_positions.len(),
            state.structure.primary_elements.len()
        );
    }

    #[test]
    fn test_cluster_sub_levels() {
        let mut layout = Layout::new();
        for id in ["p", "r", "u", "d1", "d2", "d3", "ext"] {
            layout.add_element(Element::new(id));
        }
        for (from, to) in [
            ("p", "u"),
            ("r", "u"),
            ("u", "d1"),
            ("u", "d2"),
            ("u", "d3"),
            ("ext", "p"),
        ] {
            layout.add_connection(Connection::new(from, to));
        }

        run_through_expansion(&mut layout);

        // ext sits alone on row 0, the cluster fans out from row 1
        let y = |id: &str| layout.abstract_positions[id].1;
        assert_eq!(y("ext"), 0.0);
        assert_eq!(y("p"), 1.0);
        assert_eq!(y("r"), 1.0);
        assert_eq!(y("u"), 2.0);
        assert_eq!(y("d1"), 3.0);
        assert_eq!(y("d2"), 3.0);
        assert_eq!(y("d3"), 3.0);

        // Anchor row members straddle the cluster position 0.4 units apart
        let px = layout.abstract_positions["p"].0;
        let rx = layout.abstract_positions["r"].0;
        assert!((rx - px - MEMBER_SPACING).abs() < 1e-9);

        // Sub-level members are spaced and ordered by id
        let d1 = layout.abstract_positions["d1"].0;
        let d2 = layout.abstract_positions["d2"].0;
        let d3 = layout.abstract_positions["d3"].0;
        assert!(d1 < d2 && d2 < d3);

        assert_eq!(layout.optimized_layer_order.len(), 4);
        assert_eq!(layout.optimized_layer_order[0], vec!["ext".to_string()]);
        assert_eq!(
            layout.optimized_layer_order[2],
            vec!["u".to_string()]
        );
    }

    #[test]
    fn test_plain_vertices_inherit_offsets() {
        let mut layout = Layout::new();
        for id in ["a", "b"] {
            layout.add_element(Element::new(id));
        }
        layout.add_connection(Connection::new("a", "b"));

        let state = run_through_expansion(&mut layout);
        assert_eq!(
            layout.abstract_positions["a"],
            (state.x_offsets["a"], 0.0)
        );
        assert_eq!(
            layout.abstract_positions["b"],
            (state.x_offsets["b"], 1.0)
        );
    }
}
