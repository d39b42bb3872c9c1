//! Problem definition: typed input slots, constants and the functions the
//! search may apply. Fixed before search begins.

use crate::error::{Error, Result};
use crate::functions::FunctionKind;
use crate::samples::Value;
use crate::types::Type;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Enumeration {
    pub name: String,
    pub labels: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantSlot {
    pub ty: Type,
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub inputs: Vec<InputSlot>,
    pub constants: Vec<ConstantSlot>,
    pub enumerations: Vec<Enumeration>,
    pub functions: Vec<FunctionKind>,
    /// Class names of a multi-class problem; `Supervision::Class` indexes
    /// into them.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, name: &str, ty: Type) -> Self {
        self.inputs.push(InputSlot { name: name.to_string(), ty });
        self
    }

    pub fn with_constant(mut self, ty: Type, value: Value) -> Self {
        self.constants.push(ConstantSlot { ty, value });
        self
    }

    /// Declares an enumeration and returns its type.
    pub fn add_enumeration(&mut self, name: &str, labels: &[&str]) -> Type {
        self.enumerations.push(Enumeration {
            name: name.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        });
        Type::Enum(self.enumerations.len() as u32 - 1)
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_function(mut self, kind: FunctionKind) -> Self {
        if !self.functions.contains(&kind) {
            self.functions.push(kind);
        }
        self
    }

    pub fn with_functions(mut self, kinds: &[FunctionKind]) -> Self {
        for kind in kinds {
            self = self.with_function(*kind);
        }
        self
    }

    pub fn enum_sizes(&self) -> Vec<usize> {
        self.enumerations.iter().map(|e| e.labels.len()).collect()
    }

    /// Types a finished weak learner may have: booleans, and scalars which
    /// become decision stumps.
    pub fn accepts_target_type(&self, ty: Type) -> bool {
        ty.is_bool() || ty.is_scalar()
    }

    /// Rejects configurations no search could work with.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(Error::NoInputs);
        }
        let declared = self.inputs.iter().map(|i| i.ty).chain(self.constants.iter().map(|c| c.ty));
        for ty in declared {
            match ty {
                Type::Enum(e) if e as usize >= self.enumerations.len() => {
                    return Err(Error::UnknownEnumeration(e));
                }
                Type::Vector(_) => return Err(Error::UnsupportedType(ty)),
                _ => {}
            }
        }
        let yieldable_input = self.inputs.iter().any(|i| self.accepts_target_type(i.ty));
        if self.functions.is_empty() && !yieldable_input {
            return Err(Error::NoFunctions);
        }
        Ok(())
    }
}

/// What an example is supervised with.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Supervision {
    /// Binary class, `true` is the positive class.
    Binary(bool),
    Regression(f64),
    /// One alternative inside a ranking group; lower cost is better.
    Ranked { group: u32, cost: f64 },
    /// Index into the problem's class labels.
    Class(u32),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub inputs: Vec<Value>,
    pub supervision: Supervision,
}

impl Example {
    pub fn new(inputs: Vec<Value>, supervision: Supervision) -> Self {
        Self { inputs, supervision }
    }
}
