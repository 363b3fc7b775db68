use log::debug;

use crate::errors::LayoutError;
use crate::layout::traits::LayoutPhase;
use crate::layout::{PhaseId, PipelineState};
use crate::types::{Layout, LayoutOptions};

/// Phase 2: purely diagnostic. Summarises the derived structure into the
/// layout's annotation map; nothing downstream reads these values.
pub struct TopologyDiagnostics;

impl LayoutPhase for TopologyDiagnostics {
    fn id(&self) -> PhaseId {
        PhaseId::TopologyDiagnostics
    }

    fn name(&self) -> &'static str {
        "topology diagnostics"
    }

    fn description(&self) -> &'static str {
        "Annotates the layout with graph statistics"
    }

    fn apply(
        &self,
        layout: &mut Layout,
        state: &mut PipelineState,
        _options: &LayoutOptions,
    ) -> Result<(), LayoutError> {
        let structure = &state.structure;

        let element_count = layout.elements.len();
        let primary_count = structure.primary_elements.len();
        let connection_count = layout.connections.len();
        let reduced_vertices = structure.reduced.vertices.len();
        let reduced_edges = structure.reduced.edges.len();

        let level_count = structure
            .reduced
            .levels
            .values()
            .max()
            .map_or(0, |max| max + 1);
        let widest_level = (0..level_count)
            .map(|level| {
                structure
                    .reduced
                    .levels
                    .values()
                    .filter(|l| **l == level)
                    .count()
            })
            .max()
            .unwrap_or(0);

        // A leveling edge that fails to climb means an SCC was collapsed
        let cyclic = structure.primary_leveling_edges.iter().any(|(from, to)| {
            structure.topological_levels.get(from) >= structure.topological_levels.get(to)
        });
        let max_containment_depth = structure
            .element_tree
            .values()
            .map(|node| node.depth)
            .max()
            .unwrap_or(0);

        let annotations = &mut layout.annotations;
        annotations.insert("elements".into(), element_count.to_string());
        annotations.insert("primaries".into(), primary_count.to_string());
        annotations.insert("connections".into(), connection_count.to_string());
        annotations.insert("reduced_vertices".into(), reduced_vertices.to_string());
        annotations.insert("reduced_edges".into(), reduced_edges.to_string());
        annotations.insert(
            "virtual_containers".into(),
            structure.virtual_containers.len().to_string(),
        );
        annotations.insert("levels".into(), level_count.to_string());
        annotations.insert("widest_level".into(), widest_level.to_string());
        annotations.insert("cyclic".into(), cyclic.to_string());
        annotations.insert(
            "max_containment_depth".into(),
            max_containment_depth.to_string(),
        );

        debug!(
            "topology: {} elements ({} primary), {} connections, {} levels, cyclic={}",
            element_count, primary_count, connection_count, level_count, cyclic
        );
        Ok(())
    }
}
