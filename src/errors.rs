use thiserror::Error;

use crate::types::Id;

/// Fatal errors that abort the pipeline
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayoutError {
    #[error("element {child} is contained by both {first} and {second}")]
    MultipleParents { child: Id, first: Id, second: Id },
    #[error("containment cycle through element {id}")]
    ContainmentCycle { id: Id },
    #[error("unknown element {id} referenced by {referrer}")]
    UnknownElement { id: Id, referrer: Id },
    #[error("diagram has no primary elements")]
    EmptyGraph,
    #[error("invalid layout input: {message}")]
    InvalidInput { message: String },
}

/// Non-fatal findings; the layout is still produced
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayoutWarning {
    #[error("connection {from} -> {to} references an unknown element and was dropped")]
    DanglingConnection { from: Id, to: Id },
    #[error("offset bisection did not converge within {passes} passes")]
    BisectionDidNotConverge { passes: usize },
    #[error("elements {first} and {second} still overlap after redistribution")]
    ResidualOverlap { first: Id, second: Id },
}
