use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::LayoutError;

/// Unique identifier for elements
pub type Id = String;

/// Estimated width of one label character in pixels
pub const TEXT_CHAR_WIDTH: f64 = 7.2;
/// Height of one label line in pixels
pub const TEXT_LINE_HEIGHT: f64 = 14.0;
/// Vertical distance between a box and the first label line below it
pub const LABEL_OFFSET_BOTTOM: f64 = 6.0;

/// Kind of a diagram element; determines the icon and baseline size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Server,
    Firewall,
    Router,
    Database,
    Workstation,
    Building,
    Cloud,
    #[default]
    Generic,
}

impl ElementKind {
    /// Baseline box size in pixels for the given base icon width
    pub fn base_size(&self, icon_width: f64) -> (f64, f64) {
        match self {
            ElementKind::Building => (1.5 * icon_width, icon_width),
            ElementKind::Cloud => (1.4 * icon_width, 0.9 * icon_width),
            ElementKind::Firewall => (0.9 * icon_width, icon_width),
            _ => (icon_width, icon_width),
        }
    }
}

/// Node in the diagram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: Id,
    #[serde(default)]
    pub kind: ElementKind,
    /// Ordered child element ids; non-empty makes this element a container
    #[serde(default)]
    pub contains: Vec<Id>,
    pub label: Option<String>,
    pub color: Option<String>,
    /// Box centre in pixels, filled in by the layout pipeline
    pub position: Option<(f64, f64)>,
    /// Box (width, height) in pixels, filled in by the layout pipeline
    pub size: Option<(f64, f64)>,
}

impl Element {
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Generic,
            contains: Vec::new(),
            label: None,
            color: None,
            position: None,
            size: None,
        }
    }

    pub fn with_kind(mut self, kind: ElementKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_child(mut self, child: impl Into<Id>) -> Self {
        self.contains.push(child.into());
        self
    }

    pub fn is_container(&self) -> bool {
        !self.contains.is_empty()
    }

    /// Number of lines in the label, 0 when there is none
    pub fn label_lines(&self) -> usize {
        self.label.as_ref().map_or(0, |l| l.lines().count())
    }

    /// Estimated pixel width of the widest label line
    pub fn label_width(&self) -> f64 {
        self.label.as_ref().map_or(0.0, |l| {
            l.lines()
                .map(|line| line.chars().count())
                .max()
                .unwrap_or(0) as f64
                * TEXT_CHAR_WIDTH
        })
    }

    /// Estimated pixel height of the label block
    pub fn label_height(&self) -> f64 {
        self.label_lines() as f64 * TEXT_LINE_HEIGHT
    }

    /// Box rectangle as (min_x, min_y, max_x, max_y), label excluded
    pub fn box_extent(&self) -> Option<(f64, f64, f64, f64)> {
        let (x, y) = self.position?;
        let (w, h) = self.size?;
        Some((x - w / 2.0, y - h / 2.0, x + w / 2.0, y + h / 2.0))
    }

    /// Occupied rectangle as (min_x, min_y, max_x, max_y): the box plus,
    /// for non-containers, the label hanging below it. Container labels
    /// are reserved inside the box during growth.
    pub fn extent(&self) -> Option<(f64, f64, f64, f64)> {
        let (x, y) = self.position?;
        let (w, h) = self.size?;
        let mut min_x = x - w / 2.0;
        let mut max_x = x + w / 2.0;
        let min_y = y - h / 2.0;
        let mut max_y = y + h / 2.0;
        if !self.is_container() && self.label.is_some() {
            let half_label = self.label_width() / 2.0;
            min_x = min_x.min(x - half_label);
            max_x = max_x.max(x + half_label);
            max_y += LABEL_OFFSET_BOTTOM + self.label_height();
        }
        Some((min_x, min_y, max_x, max_y))
    }
}

/// Arrowhead style of a connection; routing metadata, not topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDirection {
    Forward,
    Backward,
    Bidirectional,
    None,
}

/// Directed edge between two elements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub from: Id,
    pub to: Id,
    pub label: Option<String>,
    pub direction: Option<ConnectionDirection>,
    pub relation: Option<String>,
}

impl Connection {
    pub fn new(from: impl Into<Id>, to: impl Into<Id>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: None,
            direction: None,
            relation: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_direction(mut self, direction: ConnectionDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }
}

/// Drawing surface dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
}

/// The mutable working object the pipeline phases operate on
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Layout {
    pub canvas: Option<Canvas>,
    /// Elements in document order, keyed by id
    pub elements: IndexMap<Id, Element>,
    pub connections: Vec<Connection>,
    /// Abstract-unit (x, y) per primary element, filled in by expansion
    #[serde(default)]
    pub abstract_positions: BTreeMap<Id, (f64, f64)>,
    /// Primary elements grouped into rows, left to right, top to bottom
    #[serde(default)]
    pub optimized_layer_order: Vec<Vec<Id>>,
    /// Diagnostic key/value annotations written by the topology phase
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_element(&mut self, element: Element) -> &mut Self {
        self.elements.insert(element.id.clone(), element);
        self
    }

    pub fn add_connection(&mut self, connection: Connection) -> &mut Self {
        self.connections.push(connection);
        self
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.get(id)
    }

    /// Load a layout from JSON
    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        serde_json::from_str(json).map_err(|e| LayoutError::InvalidInput {
            message: e.to_string(),
        })
    }

    /// Serialize the layout to JSON
    pub fn to_json(&self) -> Result<String, LayoutError> {
        serde_json::to_string(self).map_err(|e| LayoutError::InvalidInput {
            message: e.to_string(),
        })
    }
}

/// Layout configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutOptions {
    /// Base pixel unit; all spacing scales with it
    pub icon_width: f64,
    /// Minimum pixel gap between neighbouring primaries in the same row
    pub min_horizontal_gap: f64,
    /// Pixel padding inside containers
    pub container_padding: f64,
    /// Upper bound on bidirectional barycenter passes
    pub max_barycenter_iterations: usize,
    /// Convergence threshold for the offset bisection, in abstract units
    pub bisection_epsilon: f64,
    /// Upper bound on forward+backward bisection pass pairs
    pub bisection_max_passes: usize,
    /// Grow the canvas to fit the layout instead of centring into it
    pub auto_expand_canvas: bool,
    /// Invoke the snapshot sink after every phase
    pub visualize_phases: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            icon_width: 60.0,
            min_horizontal_gap: 24.0,
            container_padding: 16.0,
            max_barycenter_iterations: 4,
            bisection_epsilon: 0.001,
            bisection_max_passes: 100,
            auto_expand_canvas: true,
            visualize_phases: false,
        }
    }
}

impl LayoutOptions {
    /// Pixel distance per abstract x-unit
    pub fn horizontal_step(&self) -> f64 {
        1.5 * self.icon_width
    }

    /// Pixel distance per abstract y-unit
    pub fn vertical_step(&self) -> f64 {
        1.25 * self.icon_width
    }

    /// Pixel margin above the first row
    pub fn top_margin(&self) -> f64 {
        1.25 * self.icon_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_detection() {
        let plain = Element::new("a");
        let container = Element::new("b").with_child("a");
        assert!(!plain.is_container());
        assert!(container.is_container());
    }

    #[test]
    fn test_label_metrics() {
        let element = Element::new("a").with_label("first line\nsecond, longer line");
        assert_eq!(element.label_lines(), 2);
        assert_eq!(element.label_width(), 19.0 * TEXT_CHAR_WIDTH);
        assert_eq!(element.label_height(), 2.0 * TEXT_LINE_HEIGHT);
    }

    #[test]
    fn test_layout_json_round_trip() {
        let mut layout = Layout::new();
        layout.add_element(Element::new("a").with_kind(ElementKind::Server));
        layout.add_element(Element::new("b"));
        layout.add_connection(Connection::new("a", "b").with_label("link"));

        let json = layout.to_json().unwrap();
        let restored = Layout::from_json(&json).unwrap();

        assert_eq!(restored.elements.len(), 2);
        assert_eq!(restored.connections.len(), 1);
        assert_eq!(restored.element("a").unwrap().kind, ElementKind::Server);
    }

    #[test]
    fn test_default_options_spacing() {
        let options = LayoutOptions::default();
        assert_eq!(options.horizontal_step(), 90.0);
        assert_eq!(options.vertical_step(), 75.0);
        assert_eq!(options.top_margin(), 75.0);
    }
}
