use crate::types::Type;
use thiserror::Error;

/// Errors surfaced before or outside of search. Degenerate boosting rounds
/// are not errors; they come back as `StopReason`s.
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem declares no input slots")]
    NoInputs,

    #[error("problem declares no usable functions and no boolean input to yield")]
    NoFunctions,

    #[error("type search space is empty: no program of at most {max_steps} steps can be yielded")]
    EmptySearchSpace { max_steps: usize },

    #[error("unknown enumeration {0}")]
    UnknownEnumeration(u32),

    #[error("type {0:?} cannot be declared on an input or constant slot")]
    UnsupportedType(Type),

    #[error("multi-class objective needs at least two class labels, the problem has {0}")]
    TooFewClasses(usize),

    #[error("function {function} expects {expected} arguments, got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("ill-typed node {node}: argument types {args:?} are not accepted")]
    IllTypedNode { node: String, args: Vec<Type> },

    #[error("node {node} references argument {argument} which is not in the graph")]
    DanglingArgument { node: String, argument: u32 },

    #[error("example {index} has {actual} input cells, expected {expected}")]
    ExampleShape {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("example {index} slot {slot}: value does not fit type {ty:?}")]
    ExampleType { index: usize, slot: usize, ty: Type },

    #[error("no training examples have been set")]
    NoExamples,

    #[error("supervision of example {index} does not match the objective: {reason}")]
    SupervisionMismatch { index: usize, reason: String },

    #[error("malformed model: {0}")]
    ModelFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
