//! Functions available to feature programs.
//!
//! A `FunctionKind` is what a problem declares; a `Function` is one concrete
//! instantiation with its literal parameters bound (a label of an
//! enumeration, a stump threshold).

use crate::samples::{Samples, Value};
use crate::types::Type;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    Add,
    Sub,
    Mul,
    Div,
    Log,
    Greater,
    And,
    Or,
    Not,
    EqualsLabel,
}

impl FunctionKind {
    pub fn arity(self) -> usize {
        match self {
            FunctionKind::Log | FunctionKind::Not | FunctionKind::EqualsLabel => 1,
            _ => 2,
        }
    }

    /// Whether input `index` of this function accepts a value of type `ty`.
    pub fn accepts_input(self, _index: usize, ty: Type) -> bool {
        match self {
            FunctionKind::Add
            | FunctionKind::Sub
            | FunctionKind::Mul
            | FunctionKind::Div
            | FunctionKind::Log
            | FunctionKind::Greater => ty.is_scalar(),
            FunctionKind::And | FunctionKind::Or | FunctionKind::Not => ty.is_bool(),
            FunctionKind::EqualsLabel => matches!(ty, Type::Enum(_)),
        }
    }

    /// Whether the top `arity` types of `stack` are accepted.
    pub fn accepts_stack(self, stack: &[Type]) -> bool {
        let n = self.arity();
        if n > stack.len() {
            return false;
        }
        let first = stack.len() - n;
        (0..n).all(|i| self.accepts_input(i, stack[first + i]))
    }

    /// Enumerates every concrete instantiation for the given input types.
    /// `enum_sizes[e]` is the number of labels of enumeration `e`.
    pub fn instantiate(self, inputs: &[Type], enum_sizes: &[usize]) -> Vec<Function> {
        match self {
            FunctionKind::Add => vec![Function::Add],
            FunctionKind::Sub => vec![Function::Sub],
            FunctionKind::Mul => vec![Function::Mul],
            FunctionKind::Div => vec![Function::Div],
            FunctionKind::Log => vec![Function::Log],
            FunctionKind::Greater => vec![Function::Greater],
            FunctionKind::And => vec![Function::And],
            FunctionKind::Or => vec![Function::Or],
            FunctionKind::Not => vec![Function::Not],
            FunctionKind::EqualsLabel => match inputs.first() {
                Some(Type::Enum(e)) => {
                    let n = enum_sizes.get(*e as usize).copied().unwrap_or(0);
                    (0..n as u32)
                        .map(|label| Function::EqualsLabel { enumeration: *e, label })
                        .collect()
                }
                _ => Vec::new(),
            },
        }
    }
}

/// A concrete function with bound literal parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum Function {
    Add,
    Sub,
    Mul,
    Div,
    Log,
    Greater,
    And,
    Or,
    Not,
    EqualsLabel { enumeration: u32, label: u32 },
    /// `x >= threshold`
    Stump { threshold: f64 },
}

// Manual Hash/Eq for the float parameter
impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Function::EqualsLabel { enumeration: e1, label: l1 },
                Function::EqualsLabel { enumeration: e2, label: l2 },
            ) => e1 == e2 && l1 == l2,
            (Function::Stump { threshold: a }, Function::Stump { threshold: b }) => a.to_bits() == b.to_bits(),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Eq for Function {}

impl Hash for Function {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Function::EqualsLabel { enumeration, label } => {
                enumeration.hash(state);
                label.hash(state);
            }
            Function::Stump { threshold } => threshold.to_bits().hash(state),
            _ => {}
        }
    }
}

impl Function {
    pub fn kind(&self) -> Option<FunctionKind> {
        Some(match self {
            Function::Add => FunctionKind::Add,
            Function::Sub => FunctionKind::Sub,
            Function::Mul => FunctionKind::Mul,
            Function::Div => FunctionKind::Div,
            Function::Log => FunctionKind::Log,
            Function::Greater => FunctionKind::Greater,
            Function::And => FunctionKind::And,
            Function::Or => FunctionKind::Or,
            Function::Not => FunctionKind::Not,
            Function::EqualsLabel { .. } => FunctionKind::EqualsLabel,
            Function::Stump { .. } => return None,
        })
    }

    pub fn arity(&self) -> usize {
        match self.kind() {
            Some(kind) => kind.arity(),
            None => 1,
        }
    }

    pub fn accepts_input(&self, index: usize, ty: Type) -> bool {
        match self {
            Function::EqualsLabel { enumeration, .. } => ty == Type::Enum(*enumeration),
            Function::Stump { .. } => ty.is_scalar(),
            _ => self.kind().map_or(false, |k| k.accepts_input(index, ty)),
        }
    }

    /// Output type, or `None` if the input types are not accepted.
    pub fn output_type(&self, inputs: &[Type]) -> Option<Type> {
        if inputs.len() != self.arity() {
            return None;
        }
        if !inputs.iter().enumerate().all(|(i, ty)| self.accepts_input(i, *ty)) {
            return None;
        }
        Some(match self {
            Function::Add | Function::Sub | Function::Mul => {
                if inputs.iter().all(|t| *t == Type::Int) {
                    Type::Int
                } else {
                    Type::Double
                }
            }
            Function::Div | Function::Log => Type::Double,
            Function::Greater
            | Function::And
            | Function::Or
            | Function::Not
            | Function::EqualsLabel { .. }
            | Function::Stump { .. } => Type::Bool,
        })
    }

    pub fn is_commutative(&self) -> bool {
        matches!(self, Function::Add | Function::Mul | Function::And | Function::Or)
    }

    /// f(x, x) is a constant or x itself, so applying it to identical
    /// arguments never produces anything new.
    pub fn all_same_arg_irrelevant(&self) -> bool {
        matches!(
            self,
            Function::Sub | Function::Div | Function::Greater | Function::And | Function::Or
        )
    }

    /// Applies the function to one example's argument cells.
    pub fn apply(&self, args: &[Value]) -> Value {
        match self {
            Function::Add => scalar2(args, |a, b| a + b),
            Function::Sub => scalar2(args, |a, b| a - b),
            Function::Mul => scalar2(args, |a, b| a * b),
            Function::Div => scalar2(args, |a, b| if b == 0.0 { f64::NAN } else { a / b }),
            Function::Log => {
                let x = args[0].as_scalar();
                if x > 0.0 {
                    Value::Scalar(x.ln())
                } else {
                    Value::Missing
                }
            }
            Function::Greater => {
                let (a, b) = (args[0].as_scalar(), args[1].as_scalar());
                if a.is_nan() || b.is_nan() {
                    Value::Missing
                } else {
                    Value::Bool(a > b)
                }
            }
            Function::And => bool2(args, |a, b| a && b),
            Function::Or => bool2(args, |a, b| a || b),
            Function::Not => match args[0] {
                Value::Bool(b) => Value::Bool(!b),
                _ => Value::Missing,
            },
            Function::EqualsLabel { label, .. } => match args[0] {
                Value::Label(l) => Value::Bool(l == *label),
                _ => Value::Missing,
            },
            Function::Stump { threshold } => {
                let x = args[0].as_scalar();
                if x.is_nan() {
                    Value::Missing
                } else {
                    Value::Bool(x >= *threshold)
                }
            }
        }
    }

    /// Elementwise evaluation over argument columns of length `n`.
    pub fn evaluate(&self, args: &[&Samples], output: Type, n: usize) -> Samples {
        let cells_at = |i: usize| -> SmallVec<[Value; 2]> { args.iter().map(|a| a.get(i)).collect() };
        match output {
            Type::Bool => Samples::Bool((0..n).map(|i| self.apply(&cells_at(i)).as_raw_bool()).collect()),
            Type::Int | Type::Double => {
                Samples::Scalar((0..n).map(|i| self.apply(&cells_at(i)).as_scalar()).collect())
            }
            Type::Enum(_) => Samples::Label((0..n).map(|i| self.apply(&cells_at(i)).as_label()).collect()),
            // no function produces vectors
            Type::Vector(_) => Samples::constant(output, Value::Missing, n),
        }
    }

    /// Short display form, e.g. `x + y`, `x >= 0.5`, `x == label3`.
    pub fn render(&self, args: &[String]) -> String {
        match self {
            Function::Add => format!("({} + {})", args[0], args[1]),
            Function::Sub => format!("({} - {})", args[0], args[1]),
            Function::Mul => format!("({} * {})", args[0], args[1]),
            Function::Div => format!("({} / {})", args[0], args[1]),
            Function::Log => format!("log({})", args[0]),
            Function::Greater => format!("({} > {})", args[0], args[1]),
            Function::And => format!("({} && {})", args[0], args[1]),
            Function::Or => format!("({} || {})", args[0], args[1]),
            Function::Not => format!("!{}", args[0]),
            Function::EqualsLabel { label, .. } => format!("({} == #{})", args[0], label),
            Function::Stump { threshold } => format!("({} >= {})", args[0], threshold),
        }
    }
}

fn scalar2(args: &[Value], f: impl Fn(f64, f64) -> f64) -> Value {
    let r = f(args[0].as_scalar(), args[1].as_scalar());
    if r.is_nan() {
        Value::Missing
    } else {
        Value::Scalar(r)
    }
}

fn bool2(args: &[Value], f: impl Fn(bool, bool) -> bool) -> Value {
    match (args[0], args[1]) {
        (Value::Bool(a), Value::Bool(b)) => Value::Bool(f(a, b)),
        _ => Value::Missing,
    }
}
