//! Hierarchical diagram layout computation.
//!
//! Takes a diagram of elements (some of which contain others) and directed
//! connections, and produces pixel positions and sizes for every element:
//! layered ordering with crossing minimisation on a reduced primary graph,
//! offset refinement, expansion back to concrete elements, and bottom-up
//! container growth with label-aware bounds.
//!
//! ```
//! use diagram_layout::{Connection, Element, Layout, LayoutPipeline};
//!
//! let mut layout = Layout::new();
//! layout.add_element(Element::new("web"));
//! layout.add_element(Element::new("db"));
//! layout.add_connection(Connection::new("web", "db"));
//!
//! let report = LayoutPipeline::with_defaults().run(&mut layout).unwrap();
//! assert!(report.warnings.is_empty());
//! assert!(layout.element("db").unwrap().position.is_some());
//! ```

pub mod errors;
pub mod layout;
pub mod structure;
pub mod types;

pub use errors::{LayoutError, LayoutWarning};
pub use layout::{
    apply_layout, LayoutPipeline, LayoutPhase, LayoutReport, PhaseId, PhaseSink, PipelineState,
};
pub use structure::{ReducedGraph, StructureInfo, TreeNode, VirtualContainer};
pub use types::{
    Canvas, Connection, ConnectionDirection, Element, ElementKind, Id, Layout, LayoutOptions,
};
