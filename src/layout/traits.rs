use crate::errors::LayoutError;
use crate::layout::{PhaseId, PipelineState};
use crate::types::{Layout, LayoutOptions};

/// Common trait for all pipeline phases
pub trait LayoutPhase {
    /// Identifier of the phase
    fn id(&self) -> PhaseId;

    /// Get the name of the phase
    fn name(&self) -> &'static str;

    /// Get a description of the phase
    fn description(&self) -> &'static str;

    /// Apply the phase to the layout and shared pipeline state
    fn apply(
        &self,
        layout: &mut Layout,
        state: &mut PipelineState,
        options: &LayoutOptions,
    ) -> Result<(), LayoutError>;
}

/// Receiver for per-phase layout snapshots
pub trait PhaseSink {
    fn snapshot(&mut self, phase: PhaseId, layout: &Layout);
}

impl<F: FnMut(PhaseId, &Layout)> PhaseSink for F {
    fn snapshot(&mut self, phase: PhaseId, layout: &Layout) {
        self(phase, layout)
    }
}
