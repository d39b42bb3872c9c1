use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type of a node. Enumerations are referenced by their index in the
/// owning `Problem`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
    Bool,
    Int,
    Double,
    Enum(u32),
    /// One real value per class label. Only votes and ensembles have it.
    Vector(u32),
}

impl Type {
    /// Whether values of this type can be thresholded by a stump.
    pub fn is_scalar(self) -> bool {
        matches!(self, Type::Int | Type::Double)
    }

    pub fn is_bool(self) -> bool {
        self == Type::Bool
    }

    /// Reals per example: the label count of vectors, 1 otherwise.
    pub fn width(self) -> usize {
        match self {
            Type::Vector(labels) => labels as usize,
            _ => 1,
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => f.write_str("Bool"),
            Type::Int => f.write_str("Int"),
            Type::Double => f.write_str("Double"),
            Type::Enum(id) => write!(f, "Enum{}", id),
            Type::Vector(labels) => write!(f, "Vector{}", labels),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Renders a type stack the way type states print it: `{Double, Bool}`.
pub fn format_stack(stack: &[Type]) -> String {
    let mut out = String::from("{");
    for (i, ty) in stack.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("{:?}", ty));
    }
    out.push('}');
    out
}
