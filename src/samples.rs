//! Per-example value columns.
//!
//! Booleans are stored raw: 0 = false, 1 = true, 2 = missing. Scalars use NaN
//! for missing values and labels use `MISSING_LABEL`. Vectors are stored row
//! by row, `width` reals per example.

use crate::types::Type;
use serde::{Deserialize, Serialize};

pub const RAW_FALSE: u8 = 0;
pub const RAW_TRUE: u8 = 1;
pub const RAW_MISSING: u8 = 2;
pub const MISSING_LABEL: u32 = u32::MAX;

/// One input cell of an example.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Scalar(f64),
    Label(u32),
    Missing,
}

impl Value {
    pub fn fits(&self, ty: Type) -> bool {
        match (self, ty) {
            (Value::Missing, _) => true,
            (Value::Bool(_), Type::Bool) => true,
            (Value::Scalar(_), Type::Int | Type::Double) => true,
            (Value::Label(_), Type::Enum(_)) => true,
            _ => false,
        }
    }

    pub fn as_raw_bool(&self) -> u8 {
        match self {
            Value::Bool(true) => RAW_TRUE,
            Value::Bool(false) => RAW_FALSE,
            _ => RAW_MISSING,
        }
    }

    pub fn as_scalar(&self) -> f64 {
        match self {
            Value::Scalar(x) => *x,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            _ => f64::NAN,
        }
    }

    pub fn as_label(&self) -> u32 {
        match self {
            Value::Label(l) => *l,
            _ => MISSING_LABEL,
        }
    }
}

/// A column of per-example values for one node.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    Bool(Vec<u8>),
    Scalar(Vec<f64>),
    Label(Vec<u32>),
    Vector { width: usize, values: Vec<f64> },
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Bool(v) => v.len(),
            Samples::Scalar(v) => v.len(),
            Samples::Label(v) => v.len(),
            Samples::Vector { width, values } => values.len() / (*width).max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a constant column of `n` copies of `value`.
    pub fn constant(ty: Type, value: Value, n: usize) -> Self {
        match ty {
            Type::Bool => Samples::Bool(vec![value.as_raw_bool(); n]),
            Type::Int | Type::Double => Samples::Scalar(vec![value.as_scalar(); n]),
            Type::Enum(_) => Samples::Label(vec![value.as_label(); n]),
            Type::Vector(labels) => Samples::Vector {
                width: labels as usize,
                values: vec![f64::NAN; n * labels as usize],
            },
        }
    }

    /// Extracts column `slot` from a list of example rows.
    pub fn column(ty: Type, rows: &[Vec<Value>], slot: usize) -> Self {
        let cell = |row: &Vec<Value>| row.get(slot).copied().unwrap_or(Value::Missing);
        match ty {
            Type::Bool => Samples::Bool(rows.iter().map(|r| cell(r).as_raw_bool()).collect()),
            Type::Int | Type::Double => Samples::Scalar(rows.iter().map(|r| cell(r).as_scalar()).collect()),
            Type::Enum(_) => Samples::Label(rows.iter().map(|r| cell(r).as_label()).collect()),
            Type::Vector(_) => Samples::constant(ty, Value::Missing, rows.len()),
        }
    }

    pub fn as_bools(&self) -> Option<&[u8]> {
        match self {
            Samples::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_scalars(&self) -> Option<&[f64]> {
        match self {
            Samples::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// The reals of a scalar or vector column, row by row.
    pub fn values(&self) -> Option<&[f64]> {
        match self {
            Samples::Scalar(v) | Samples::Vector { values: v, .. } => Some(v),
            _ => None,
        }
    }

    pub fn values_mut(&mut self) -> Option<&mut [f64]> {
        match self {
            Samples::Scalar(v) | Samples::Vector { values: v, .. } => Some(v),
            _ => None,
        }
    }

    /// Row `i` of a vector column.
    pub fn row(&self, i: usize) -> Option<&[f64]> {
        match self {
            Samples::Vector { width, values } => values.get(i * width..(i + 1) * width),
            _ => None,
        }
    }

    /// Value of example `i` as a cell.
    pub fn get(&self, i: usize) -> Value {
        match self {
            Samples::Bool(v) => match v[i] {
                RAW_FALSE => Value::Bool(false),
                RAW_TRUE => Value::Bool(true),
                _ => Value::Missing,
            },
            Samples::Scalar(v) => {
                if v[i].is_nan() {
                    Value::Missing
                } else {
                    Value::Scalar(v[i])
                }
            }
            Samples::Label(v) => {
                if v[i] == MISSING_LABEL {
                    Value::Missing
                } else {
                    Value::Label(v[i])
                }
            }
            // a vector row has no single-cell form
            Samples::Vector { .. } => Value::Missing,
        }
    }

    /// Approximate heap footprint, used by the cache eviction budget.
    pub fn size_bytes(&self) -> usize {
        match self {
            Samples::Bool(v) => v.len(),
            Samples::Scalar(v) => v.len() * 8,
            Samples::Label(v) => v.len() * 4,
            Samples::Vector { values, .. } => values.len() * 8,
        }
    }
}
