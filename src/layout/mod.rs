use log::debug;
use std::collections::BTreeMap;

use crate::errors::{LayoutError, LayoutWarning};
use crate::structure::StructureInfo;
use crate::types::{Id, Layout, LayoutOptions};

pub mod phases;
pub mod traits;

pub use traits::{LayoutPhase, PhaseSink};

use phases::bisection::PositionOptimizer;
use phases::centrality::CentralityOrdering;
use phases::expansion::NdprExpander;
use phases::inflation::Inflator;
use phases::placement::AbstractPlacer;
use phases::redistribution::Redistributor;
use phases::structure::StructureAnalyzer;
use phases::topology::TopologyDiagnostics;

/// Identifier of a pipeline phase, handed to snapshot sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseId {
    StructureAnalysis,
    TopologyDiagnostics,
    CentralityOrdering,
    AbstractPlacement,
    PositionOptimization,
    Expansion,
    Inflation,
    Redistribution,
}

/// Intermediate state threaded through the phases. Earlier phases fill
/// fields that later phases read; nothing here survives into the output.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub structure: StructureInfo,
    /// Centrality score per reduced-graph vertex
    pub centrality: BTreeMap<Id, f64>,
    /// Frozen reduced-graph row orders after abstract placement
    pub rows: Vec<Vec<Id>>,
    /// Refined abstract x per reduced-graph vertex
    pub x_offsets: BTreeMap<Id, f64>,
    /// Straight-segment crossing count on the reduced graph (diagnostic)
    pub edge_crossings: usize,
    pub warnings: Vec<LayoutWarning>,
}

/// Summary of a pipeline run
#[derive(Debug, Clone)]
pub struct LayoutReport {
    pub warnings: Vec<LayoutWarning>,
    pub edge_crossings: usize,
}

/// Runs the layout phases in order over a mutably borrowed layout
pub struct LayoutPipeline {
    options: LayoutOptions,
}

impl LayoutPipeline {
    pub fn new(options: LayoutOptions) -> Self {
        Self { options }
    }

    pub fn with_defaults() -> Self {
        Self::new(LayoutOptions::default())
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    /// Run the full pipeline
    pub fn run(&self, layout: &mut Layout) -> Result<LayoutReport, LayoutError> {
        self.run_impl(layout, None)
    }

    /// Run the full pipeline, invoking the sink after each phase when
    /// `visualize_phases` is enabled
    pub fn run_with_sink(
        &self,
        layout: &mut Layout,
        sink: &mut dyn PhaseSink,
    ) -> Result<LayoutReport, LayoutError> {
        self.run_impl(layout, Some(sink))
    }

    fn run_impl(
        &self,
        layout: &mut Layout,
        mut sink: Option<&mut dyn PhaseSink>,
    ) -> Result<LayoutReport, LayoutError> {
        let phases: [&dyn LayoutPhase; 8] = [
            &StructureAnalyzer,
            &TopologyDiagnostics,
            &CentralityOrdering,
            &AbstractPlacer,
            &PositionOptimizer,
            &NdprExpander,
            &Inflator,
            &Redistributor,
        ];

        let mut state = PipelineState::default();
        for phase in phases {
            debug!("running phase {}", phase.name());
            phase.apply(layout, &mut state, &self.options)?;
            if self.options.visualize_phases {
                if let Some(sink) = sink.as_deref_mut() {
                    sink.snapshot(phase.id(), layout);
                }
            }
        }

        Ok(LayoutReport {
            warnings: state.warnings,
            edge_crossings: state.edge_crossings,
        })
    }
}

/// Apply the layout pipeline to a layout with the given options
pub fn apply_layout(
    layout: &mut Layout,
    options: &LayoutOptions,
) -> Result<LayoutReport, LayoutError> {
    LayoutPipeline::new(options.clone()).run(layout)
}
