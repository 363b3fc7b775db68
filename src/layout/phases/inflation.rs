use log::debug;

use crate::errors::LayoutError;
use crate::layout::traits::LayoutPhase;
use crate::layout::{PhaseId, PipelineState};
use crate::structure::StructureInfo;
use crate::types::{
    Element, Id, Layout, LayoutOptions, LABEL_OFFSET_BOTTOM, TEXT_LINE_HEIGHT,
};

/// Phase 6: convert abstract units to pixels and size containers around
/// their contents, bottom-up by containment depth.
pub struct Inflator;

impl LayoutPhase for Inflator {
    fn id(&self) -> PhaseId {
        PhaseId::Inflation
    }

    fn name(&self) -> &'static str {
        "inflation"
    }

    fn description(&self) -> &'static str {
        "Inflates abstract coordinates to pixels and grows containers"
    }

    fn apply(
        &self,
        layout: &mut Layout,
        state: &mut PipelineState,
        options: &LayoutOptions,
    ) -> Result<(), LayoutError> {
        inflate_primaries(layout, options);
        assign_base_sizes(layout, options);
        grow_containers(layout, &state.structure, options);
        remeasure_containers(layout, &state.structure, options);
        Ok(())
    }
}

/// Multiply abstract coordinates by the spacing constants. The abstract x
/// range is normalised first so the leftmost vertex lands at the margin.
fn inflate_primaries(layout: &mut Layout, options: &LayoutOptions) {
    let min_x = layout
        .abstract_positions
        .values()
        .map(|(x, _)| *x)
        .fold(f64::INFINITY, f64::min);
    let min_x = if min_x.is_finite() { min_x } else { 0.0 };

    let positions: Vec<(Id, (f64, f64))> = layout
        .abstract_positions
        .iter()
        .map(|(id, (ax, ay))| {
            (
                id.clone(),
                (
                    (ax - min_x) * options.horizontal_step() + options.top_margin(),
                    ay * options.vertical_step() + options.top_margin(),
                ),
            )
        })
        .collect();
    for (id, position) in positions {
        if let Some(element) = layout.elements.get_mut(&id) {
            element.position = Some(position);
        }
    }
}

fn assign_base_sizes(layout: &mut Layout, options: &LayoutOptions) {
    for element in layout.elements.values_mut() {
        element.size = Some(element.kind.base_size(options.icon_width));
    }
}

/// Containers ordered deepest first, document order within a depth
fn growth_order(layout: &Layout, structure: &StructureInfo) -> Vec<Id> {
    let mut containers: Vec<(usize, usize, Id)> = layout
        .elements
        .keys()
        .enumerate()
        .filter(|(_, id)| {
            structure
                .element_tree
                .get(*id)
                .map_or(false, |node| node.is_container)
        })
        .map(|(index, id)| {
            let depth = structure.element_tree[id].depth;
            (depth, index, id.clone())
        })
        .collect();
    containers.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    containers.into_iter().map(|(_, _, id)| id).collect()
}

fn grow_containers(layout: &mut Layout, structure: &StructureInfo, options: &LayoutOptions) {
    for container_id in growth_order(layout, structure) {
        arrange_children(layout, structure, options, &container_id);
        fit_container(layout, structure, options, &container_id);
    }
}

/// Walk every container again after growth; descendant labels that slipped
/// past a box grow it by the deficit, propagating upward through the
/// deepest-first order.
fn remeasure_containers(layout: &mut Layout, structure: &StructureInfo, options: &LayoutOptions) {
    for container_id in growth_order(layout, structure) {
        let Some(required) = descendant_bounds(layout, structure, &container_id) else {
            continue;
        };
        let Some(container) = layout.elements.get(&container_id) else {
            continue;
        };
        let Some((x, y)) = container.position else {
            continue;
        };
        let Some((w, h)) = container.size else {
            continue;
        };

        let pad = options.container_padding;
        let label_reserve = container_label_reserve(container);
        let needed_min_x = required.0 - pad;
        let needed_min_y = required.1 - pad;
        let needed_max_x = required.2 + pad;
        let needed_max_y = required.3 + pad + label_reserve;

        let min_x = (x - w / 2.0).min(needed_min_x);
        let min_y = (y - h / 2.0).min(needed_min_y);
        let max_x = (x + w / 2.0).max(needed_max_x);
        let max_y = (y + h / 2.0).max(needed_max_y);

        if let Some(container) = layout.elements.get_mut(&container_id) {
            container.position = Some(((min_x + max_x) / 2.0, (min_y + max_y) / 2.0));
            container.size = Some((max_x - min_x, max_y - min_y));
        }
    }
}

/// Place the direct children in a horizontal row centred on the container
fn arrange_children(
    layout: &mut Layout,
    structure: &StructureInfo,
    options: &LayoutOptions,
    container_id: &Id,
) {
    let (cx, cy) = match layout.elements.get(container_id).and_then(|c| c.position) {
        Some(position) => position,
        None => {
            // Nested containers are placed when their parent arranges them
            if let Some(container) = layout.elements.get_mut(container_id) {
                container.position = Some((0.0, 0.0));
            }
            (0.0, 0.0)
        }
    };

    let children = match structure.element_tree.get(container_id) {
        Some(node) => node.children.clone(),
        None => return,
    };

    // Left-to-right by current x where known, document order otherwise
    let mut ordered: Vec<(usize, Option<f64>, Id)> = children
        .iter()
        .enumerate()
        .map(|(index, id)| {
            let x = layout.elements.get(id).and_then(|e| e.position).map(|p| p.0);
            (index, x, id.clone())
        })
        .collect();
    ordered.sort_by(|a, b| match (a.1, b.1) {
        (Some(ax), Some(bx)) => ax
            .partial_cmp(&bx)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.0.cmp(&b.0),
    });

    let widths: Vec<f64> = ordered
        .iter()
        .map(|(_, _, id)| {
            layout
                .elements
                .get(id)
                .map(|e| child_extent_width(e))
                .unwrap_or(0.0)
        })
        .collect();
    let gap = options.min_horizontal_gap;
    let total: f64 =
        widths.iter().sum::<f64>() + gap * widths.len().saturating_sub(1) as f64;

    let mut cursor = cx - total / 2.0;
    for ((_, _, child_id), width) in ordered.iter().zip(&widths) {
        let target = (cursor + width / 2.0, cy);
        move_element(layout, structure, child_id, target);
        cursor += width + gap;
    }
}

fn child_extent_width(element: &Element) -> f64 {
    let width = element.size.map_or(0.0, |(w, _)| w);
    if element.is_container() {
        width
    } else {
        width.max(element.label_width())
    }
}

/// Move an element to the target centre, carrying its subtree along
fn move_element(layout: &mut Layout, structure: &StructureInfo, id: &Id, target: (f64, f64)) {
    let old = layout.elements.get(id).and_then(|e| e.position);
    if let Some(element) = layout.elements.get_mut(id) {
        element.position = Some(target);
    }
    if let Some((old_x, old_y)) = old {
        let (dx, dy) = (target.0 - old_x, target.1 - old_y);
        if dx != 0.0 || dy != 0.0 {
            shift_subtree(layout, structure, id, dx, dy);
        }
    }
}

pub(crate) fn shift_subtree(
    layout: &mut Layout,
    structure: &StructureInfo,
    id: &Id,
    dx: f64,
    dy: f64,
) {
    let descendants: Vec<Id> = structure.descendants(id).into_iter().cloned().collect();
    for descendant in descendants {
        if let Some(element) = layout.elements.get_mut(&descendant) {
            if let Some((x, y)) = element.position {
                element.position = Some((x + dx, y + dy));
            }
        }
    }
}

/// Tight bounding box of all placed descendants including their labels
fn descendant_bounds(
    layout: &Layout,
    structure: &StructureInfo,
    container_id: &Id,
) -> Option<(f64, f64, f64, f64)> {
    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for id in structure.descendants(container_id) {
        let Some(extent) = layout.elements.get(id).and_then(|e| e.extent()) else {
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
    bounds
}

fn container_label_reserve(container: &Element) -> f64 {
    if container.label.is_some() {
        LABEL_OFFSET_BOTTOM + container.label_lines() as f64 * TEXT_LINE_HEIGHT
    } else {
        0.0
    }
}

/// Wrap the container box around its direct children plus padding and the
/// container's own label reserve
fn fit_container(
    layout: &mut Layout,
    structure: &StructureInfo,
    options: &LayoutOptions,
    container_id: &Id,
) {
    let children = match structure.element_tree.get(container_id) {
        Some(node) => node.children.clone(),
        None => return,
    };

    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for child in &children {
        let Some(extent) = layout.elements.get(child).and_then(|e| e.extent()) else {
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

    let Some(container) = layout.elements.get(container_id) else {
        return;
    };
    let pad = options.container_padding;
    let label_reserve = container_label_reserve(container);

    let box_min_x = min_x - pad;
    let box_min_y = min_y - pad;
    let box_max_x = max_x + pad;
    let box_max_y = max_y + pad + label_reserve;

    if let Some(container) = layout.elements.get_mut(container_id) {
        container.position = Some((
            (box_min_x + box_max_x) / 2.0,
            (box_min_y + box_max_y) / 2.0,
        ));
        container.size = Some((box_max_x - box_min_x, box_max_y - box_min_y));
    }
    debug!(
        "grew container {} to {:.1}x{:.1}",
        container_id,
        box_max_x - box_min_x,
        box_max_y - box_min_y
    );
}
