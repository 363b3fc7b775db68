use crate::errors::LayoutError;
use crate::layout::traits::LayoutPhase;
use crate::layout::{PhaseId, PipelineState};
use crate::types::{Layout, LayoutOptions};

/// Phase 3: a centrality score per reduced-graph vertex, used as a sort
/// tiebreaker by the placement phase. No positioning side effects.
pub struct CentralityOrdering;

impl LayoutPhase for CentralityOrdering {
    fn id(&self) -> PhaseId {
        PhaseId::CentralityOrdering
    }

    fn name(&self) -> &'static str {
        "centrality ordering"
    }

    fn description(&self) -> &'static str {
        "Scores reduced-graph vertices by accessibility"
    }

    fn apply(
        &self,
        _layout: &mut Layout,
        state: &mut PipelineState,
        _options: &LayoutOptions,
    ) -> Result<(), LayoutError> {
        let structure = &state.structure;
        let mut centrality = std::collections::BTreeMap::new();

        for vertex in &structure.reduced.vertices {
            let score = match structure.virtual_container(vertex) {
                // A cluster is as central as its most central member
                Some(vc) => vc
                    .members
                    .iter()
                    .filter_map(|m| structure.accessibility_scores.get(m))
                    .fold(0.0f64, |a, b| a.max(*b)),
                None => structure
                    .accessibility_scores
                    .get(vertex)
                    .copied()
                    .unwrap_or(0.0),
            };
            centrality.insert(vertex.clone(), score);
        }

        state.centrality = centrality;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::phases::structure::StructureAnalyzer;
    use crate::types::{Connection, Element};

    #[test]
    fn test_cluster_takes_max_member_score() {
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

        let options = LayoutOptions::default();
        let mut state = PipelineState::default();
        StructureAnalyzer
            .apply(&mut layout, &mut state, &options)
            .unwrap();
        CentralityOrdering
            .apply(&mut layout, &mut state, &options)
            .unwrap();

        // u has degree 5, the highest of any member
        let expected = state.structure.accessibility_scores["u"];
        assert_eq!(state.centrality["_toi_vc_0"], expected);
        assert!(state.centrality["_toi_vc_0"] > state.centrality["ext"]);
    }
}
