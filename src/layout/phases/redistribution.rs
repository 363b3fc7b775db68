use log::{debug, warn};

use crate::errors::{LayoutError, LayoutWarning};
use crate::layout::phases::inflation::shift_subtree;
use crate::layout::traits::LayoutPhase;
use crate::layout::{PhaseId, PipelineState};
use crate::structure::StructureInfo;
use crate::types::{Canvas, Id, Layout, LayoutOptions};

/// Phase 7: eliminate horizontal overlaps left by unit spacing, spread
/// crowded columns vertically, then fit or centre the canvas. Running the
/// phase on its own output changes nothing.
pub struct Redistributor;

impl LayoutPhase for Redistributor {
    fn id(&self) -> PhaseId {
        PhaseId::Redistribution
    }

    fn name(&self) -> &'static str {
        "redistribution"
    }

    fn description(&self) -> &'static str {
        "Enforces minimum gaps and fits the canvas"
    }

    fn apply(
        &self,
        layout: &mut Layout,
        state: &mut PipelineState,
        options: &LayoutOptions,
    ) -> Result<(), LayoutError> {
        horizontal_pass(layout, state, options);
        vertical_pass(layout, state, options);
        fit_canvas(layout, options);
        report_residual_overlaps(layout, state);
        Ok(())
    }
}

fn extent_of(layout: &Layout, id: &str) -> Option<(f64, f64, f64, f64)> {
    layout.element(id).and_then(|e| e.extent())
}

/// Walk each row left to right and push elements (and their subtrees)
/// right until every neighbour pair clears the minimum gap
fn horizontal_pass(layout: &mut Layout, state: &mut PipelineState, options: &LayoutOptions) {
    let structure = state.structure.clone();
    for row in layout.optimized_layer_order.clone() {
        // Left-to-right by current centre; growth may have reordered
        let mut ordered: Vec<Id> = row
            .iter()
            .filter(|id| layout.element(id).map_or(false, |e| e.position.is_some()))
            .cloned()
            .collect();
        ordered.sort_by(|a, b| {
            let ax = layout.element(a).and_then(|e| e.position).map_or(0.0, |p| p.0);
            let bx = layout.element(b).and_then(|e| e.position).map_or(0.0, |p| p.0);
            ax.partial_cmp(&bx)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });

        for i in 1..ordered.len() {
            let Some(previous) = extent_of(layout, &ordered[i - 1]) else {
                continue;
            };
            let Some(current) = extent_of(layout, &ordered[i]) else {
                continue;
            };
            let deficit = previous.2 + options.min_horizontal_gap - current.0;
            if deficit > 0.0 {
                // The whole remainder of the row slides right together
                for id in &ordered[i..] {
                    nudge(layout, &structure, id, deficit, 0.0);
                }
            }
        }
    }
}

/// Symmetric pass down the columns: every element must clear, by the
/// minimum gap, the bottom of each earlier element it shares an x-band
/// with. Same-row neighbours never share an x-band after the horizontal
/// pass, so only genuine vertical crowding moves anything.
fn vertical_pass(layout: &mut Layout, state: &mut PipelineState, options: &LayoutOptions) {
    let structure = state.structure.clone();

    let mut ordered: Vec<Id> = structure
        .primary_elements
        .iter()
        .filter(|id| layout.element(id).map_or(false, |e| e.position.is_some()))
        .cloned()
        .collect();
    ordered.sort_by(|a, b| {
        let ay = layout.element(a).and_then(|e| e.position).map_or(0.0, |p| p.1);
        let by = layout.element(b).and_then(|e| e.position).map_or(0.0, |p| p.1);
        ay.partial_cmp(&by)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });

    for i in 1..ordered.len() {
        let Some(current) = extent_of(layout, &ordered[i]) else {
            continue;
        };
        let mut required_top = f64::NEG_INFINITY;
        for earlier in &ordered[..i] {
            let Some(other) = extent_of(layout, earlier) else {
                continue;
            };
            let x_overlap = other.0 < current.2 && current.0 < other.2;
            if x_overlap {
                required_top = required_top.max(other.3 + options.min_horizontal_gap);
            }
        }
        let deficit = required_top - current.1;
        if deficit > 0.0 {
            nudge(layout, &structure, &ordered[i], 0.0, deficit);
        }
    }
}

fn nudge(layout: &mut Layout, structure: &StructureInfo, id: &Id, dx: f64, dy: f64) {
    if let Some(element) = layout.elements.get_mut(id) {
        if let Some((x, y)) = element.position {
            element.position = Some((x + dx, y + dy));
        }
    }
    shift_subtree(layout, structure, id, dx, dy);
}

/// Translate the finished layout into the canvas, growing the canvas when
/// allowed and clamping so nothing lands at negative coordinates
fn fit_canvas(layout: &mut Layout, options: &LayoutOptions) {
    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for element in layout.elements.values() {
        let Some(extent) = element.extent() else {
            continue;
        };
        bounds = Some(match bounds {
            None => extent,
            Some(acc) => (
                acc.0.min(extent.0),
                acc.1.min(extent.1),
                acc.2.max(extent.2),
                acc.3.max(extent.3),
            ),
        });
    }
    let Some((min_x, min_y, max_x, max_y)) = bounds else {
        return;
    };

    let margin = options.min_horizontal_gap;
    let (dx, dy) = if options.auto_expand_canvas || layout.canvas.is_none() {
        layout.canvas = Some(Canvas {
            width: (max_x - min_x) + 2.0 * margin,
            height: (max_y - min_y) + 2.0 * margin,
        });
        (margin - min_x, margin - min_y)
    } else {
        // Fixed canvas: centre, but never past the origin
        let canvas = layout.canvas.unwrap_or(Canvas {
            width: 0.0,
            height: 0.0,
        });
        let dx = (canvas.width - (max_x - min_x)) / 2.0 - min_x;
        let dy = (canvas.height - (max_y - min_y)) / 2.0 - min_y;
        (dx.max(-min_x), dy.max(-min_y))
    };

    if dx != 0.0 || dy != 0.0 {
        for element in layout.elements.values_mut() {
            if let Some((x, y)) = element.position {
                element.position = Some((x + dx, y + dy));
            }
        }
    }
    debug!("canvas fitted, translation ({:.1}, {:.1})", dx, dy);
}

/// Any primary boxes still intersecting are reported, not fixed
fn report_residual_overlaps(layout: &Layout, state: &mut PipelineState) {
    let primaries = &state.structure.primary_elements;
    for (i, a) in primaries.iter().enumerate() {
        for b in primaries.iter().skip(i + 1) {
            let (Some(ea), Some(eb)) = (
                layout.element(a).and_then(|e| e.box_extent()),
                layout.element(b).and_then(|e| e.box_extent()),
            ) else {
                continue;
            };
            let separated = ea.2 <= eb.0 + 1e-6
                || eb.2 <= ea.0 + 1e-6
                || ea.3 <= eb.1 + 1e-6
                || eb.3 <= ea.1 + 1e-6;
            if !separated {
                warn!("elements {} and {} still overlap after redistribution", a, b);
                state.warnings.push(LayoutWarning::ResidualOverlap {
                    first: a.clone(),
                    second: b.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutPipeline;
    use crate::types::{Connection, Element};

    fn min_gap_holds(layout: &Layout, options: &LayoutOptions) -> bool {
        layout.optimized_layer_order.iter().all(|row| {
            let mut ordered: Vec<(f64, f64)> = row
                .iter()
                .filter_map(|id| layout.element(id).and_then(|e| e.extent()))
                .map(|e| (e.0, e.2))
                .collect();
            ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            ordered
                .windows(2)
                .all(|pair| pair[1].0 - pair[0].1 >= options.min_horizontal_gap - 1e-6)
        })
    }

    #[test]
    fn test_row_gaps_enforced() {
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

        let pipeline = LayoutPipeline::with_defaults();
        let report = pipeline.run(&mut layout).unwrap();
        assert!(min_gap_holds(&layout, pipeline.options()));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_fixed_point() {
        let mut layout = Layout::new();
        for id in ["a", "b", "c", "d"] {
            layout.add_element(Element::new(id));
        }
        for (from, to) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")] {
            layout.add_connection(Connection::new(from, to));
        }

        let options = LayoutOptions::default();
        let pipeline = LayoutPipeline::new(options.clone());
        pipeline.run(&mut layout).unwrap();

        let before = layout.to_json().unwrap();
        let mut state = PipelineState::default();
        crate::layout::phases::structure::StructureAnalyzer
            .apply(&mut layout, &mut state, &options)
            .unwrap();
        Redistributor
            .apply(&mut layout, &mut state, &options)
            .unwrap();
        let after = layout.to_json().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_canvas_grows_to_fit() {
        let mut layout = Layout::new();
        layout.add_element(Element::new("a"));
        layout.add_element(Element::new("b"));
        layout.add_connection(Connection::new("a", "b"));

        let pipeline = LayoutPipeline::with_defaults();
        pipeline.run(&mut layout).unwrap();

        let canvas = layout.canvas.unwrap();
        for element in layout.elements.values() {
            let (min_x, min_y, max_x, max_y) = element.extent().unwrap();
            assert!(min_x >= 0.0 && min_y >= 0.0);
            assert!(max_x <= canvas.width && max_y <= canvas.height);
        }
    }

    #[test]
    fn test_single_element_centred_in_fixed_canvas() {
        let mut layout = Layout::new();
        layout.canvas = Some(Canvas {
            width: 800.0,
            height: 600.0,
        });
        layout.add_element(Element::new("only"));

        let options = LayoutOptions {
            auto_expand_canvas: false,
            ..LayoutOptions::default()
        };
        LayoutPipeline::new(options).run(&mut layout).unwrap();

        let (x, y) = layout.element("only").unwrap().position.unwrap();
        assert!((x - 400.0).abs() < 1e-9);
        assert!((y - 300.0).abs() < 1e-9);
    }
}
