use std::collections::BTreeMap;

use log::{debug, warn};

use crate::errors::{LayoutError, LayoutWarning};
use crate::layout::traits::LayoutPhase;
use crate::layout::{PhaseId, PipelineState};
use crate::structure::ReducedGraph;
use crate::types::{Id, Layout, LayoutOptions};

/// Phase 5: refine the integer columns into real x-offsets by shifting
/// whole rows. Each shift is the weighted-L1 median of the offsets to the
/// adjacent fixed row, so the total edge length Σ|x(u) − x(v)| never grows.
pub struct PositionOptimizer;

impl LayoutPhase for PositionOptimizer {
    fn id(&self) -> PhaseId {
        PhaseId::PositionOptimization
    }

    fn name(&self) -> &'static str {
        "position optimization"
    }

    fn description(&self) -> &'static str {
        "Refines abstract x-offsets by layer-offset bisection"
    }

    fn apply(
        &self,
        _layout: &mut Layout,
        state: &mut PipelineState,
        options: &LayoutOptions,
    ) -> Result<(), LayoutError> {
        let rows = &state.rows;
        let reduced = &state.structure.reduced;

        let mut x_offsets: BTreeMap<Id, f64> = BTreeMap::new();
        let mut row_of: BTreeMap<&Id, usize> = BTreeMap::new();
        for (r, row) in rows.iter().enumerate() {
            for (col, vertex) in row.iter().enumerate() {
                x_offsets.insert(vertex.clone(), col as f64);
                row_of.insert(vertex, r);
            }
        }

        if rows.len() >= 2 && !reduced.edges.is_empty() {
            let mut converged = false;
            let mut passes = 0;
            while passes < options.bisection_max_passes {
                passes += 1;
                let mut max_shift = 0.0f64;

                for r in 1..rows.len() {
                    let shift = row_shift(r, r - 1, &x_offsets, &row_of, reduced);
                    apply_shift(&rows[r], shift, &mut x_offsets);
                    max_shift = max_shift.max(shift.abs());
                }
                for r in (0..rows.len() - 1).rev() {
                    let shift = row_shift(r, r + 1, &x_offsets, &row_of, reduced);
                    apply_shift(&rows[r], shift, &mut x_offsets);
                    max_shift = max_shift.max(shift.abs());
                }

                if max_shift < options.bisection_epsilon {
                    converged = true;
                    break;
                }
            }
            debug!("bisection finished after {} passes", passes);
            if !converged {
                warn!(
                    "offset bisection did not converge within {} passes",
                    options.bisection_max_passes
                );
                state.warnings.push(LayoutWarning::BisectionDidNotConverge {
                    passes: options.bisection_max_passes,
                });
            }
        }

        state.x_offsets = x_offsets;
        Ok(())
    }
}

/// Optimal scalar shift for one row against an adjacent fixed row: the
/// median of the per-edge offset differences
fn row_shift(
    moving: usize,
    fixed: usize,
    x_offsets: &BTreeMap<Id, f64>,
    row_of: &BTreeMap<&Id, usize>,
    reduced: &ReducedGraph,
) -> f64 {
    let mut diffs: Vec<f64> = Vec::new();
    for (from, to) in &reduced.edges {
        let (Some(&rf), Some(&rt)) = (row_of.get(from), row_of.get(to)) else {
            continue;
        };
        let (own, other) = if rf == moving && rt == fixed {
            (from, to)
        } else if rt == moving && rf == fixed {
            (to, from)
        } else {
            continue;
        };
        if let (Some(own_x), Some(other_x)) = (x_offsets.get(own), x_offsets.get(other)) {
            diffs.push(other_x - own_x);
        }
    }
    median(&mut diffs)
}

fn apply_shift(row: &[Id], shift: f64, x_offsets: &mut BTreeMap<Id, f64>) {
    if shift == 0.0 {
        return;
    }
    for vertex in row {
        if let Some(x) = x_offsets.get_mut(vertex) {
            *x += shift;
        }
    }
}

/// Median of the values; the midpoint of the two central values for even
/// counts, 0 when empty
fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}
