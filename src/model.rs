//! Trained model: the accepted weak learners and their votes.
//!
//! The model keeps only the part of the graph the accepted conditions depend
//! on, as a node list in topological order where arguments reference earlier
//! positions. It is persisted as JSON. Binary, regression and ranking models
//! vote with one real value; multi-class models vote with one value per class
//! label and predict the label with the highest score.

use crate::arena::{Graph, Node, NodeId};
use crate::error::{Error, Result};
use crate::functions::Function;
use crate::problem::InputSlot;
use crate::samples::Value;
use crate::types::Type;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Vote of one weak learner: what its success branch adds to the ensemble.
/// The failure branch adds the opposite, a missing condition adds nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vote {
    Scalar(f64),
    /// One value per class label.
    Labels(Vec<f64>),
}

impl Vote {
    pub fn outputs(&self) -> usize {
        match self {
            Vote::Scalar(_) => 1,
            Vote::Labels(values) => values.len(),
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        match self {
            Vote::Scalar(v) => std::slice::from_ref(v),
            Vote::Labels(values) => values,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Vote::Scalar(v) => Some(*v),
            Vote::Labels(_) => None,
        }
    }

    pub fn scaled(&self, factor: f64) -> Vote {
        match self {
            Vote::Scalar(v) => Vote::Scalar(v * factor),
            Vote::Labels(values) => Vote::Labels(values.iter().map(|v| v * factor).collect()),
        }
    }

    /// Finite, and not all zero.
    pub fn is_usable(&self) -> bool {
        let values = self.as_slice();
        values.iter().all(|v| v.is_finite()) && values.iter().any(|v| *v != 0.0)
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Scalar(v) => write!(f, "{:+.4}", v),
            Vote::Labels(values) => {
                let cells: Vec<String> = values.iter().map(|v| format!("{:+.4}", v)).collect();
                write!(f, "[{}]", cells.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelNode {
    Input { slot: u32 },
    Constant { ty: Type, value: Value },
    Function { function: Function, args: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub inputs: Vec<InputSlot>,
    /// Class names, empty unless the model is multi-class.
    #[serde(default)]
    pub labels: Vec<String>,
    pub nodes: Vec<ModelNode>,
    /// Position in `nodes` of each weak learner's boolean condition.
    pub learners: Vec<usize>,
    pub votes: Vec<Vote>,
}

impl Model {
    /// Extracts the model from the accepted Yield nodes of `graph` and their
    /// parallel votes.
    pub fn from_graph(
        graph: &Graph,
        inputs: &[InputSlot],
        labels: &[String],
        yields: &[NodeId],
        votes: &[Vote],
    ) -> Result<Self> {
        if yields.len() != votes.len() {
            return Err(Error::ModelFormat(format!(
                "{} weak learners but {} votes",
                yields.len(),
                votes.len()
            )));
        }
        let mut model = Model {
            inputs: inputs.to_vec(),
            labels: labels.to_vec(),
            nodes: Vec::new(),
            learners: Vec::with_capacity(yields.len()),
            votes: votes.to_vec(),
        };
        let mut positions: FxHashMap<NodeId, usize> = FxHashMap::default();
        for &y in yields {
            let Node::Yield(condition) = *graph.node(y) else {
                return Err(Error::ModelFormat(format!("{} is not a yield node", graph.name(y))));
            };
            let position = model.export(graph, condition, &mut positions)?;
            model.learners.push(position);
        }
        Ok(model)
    }

    fn export(&mut self, graph: &Graph, root: NodeId, positions: &mut FxHashMap<NodeId, usize>) -> Result<usize> {
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if positions.contains_key(&id) {
                continue;
            }
            let node = graph.node(id);
            if !expanded {
                stack.push((id, true));
                if let Node::Function { args, .. } = node {
                    stack.extend(args.iter().rev().map(|a| (*a, false)));
                }
                continue;
            }
            let exported = match node {
                Node::Input { slot } => ModelNode::Input { slot: *slot },
                Node::Constant { ty, value } => ModelNode::Constant { ty: *ty, value: *value },
                Node::Function { function, args } => ModelNode::Function {
                    function: *function,
                    args: args.iter().map(|a| positions[a]).collect(),
                },
                _ => {
                    return Err(Error::ModelFormat(format!(
                        "{} cannot be part of a weak learner",
                        graph.name(id)
                    )))
                }
            };
            positions.insert(id, self.nodes.len());
            self.nodes.push(exported);
        }
        Ok(positions[&root])
    }

    pub fn len(&self) -> usize {
        self.learners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.learners.is_empty()
    }

    /// Values per prediction: the class count of a multi-class model, else 1.
    pub fn outputs(&self) -> usize {
        if self.labels.is_empty() {
            1
        } else {
            self.labels.len()
        }
    }

    /// Checks every reference of a deserialized model.
    pub fn validate(&self) -> Result<()> {
        if self.learners.len() != self.votes.len() {
            return Err(Error::ModelFormat("learners and votes differ in length".to_string()));
        }
        for (position, node) in self.nodes.iter().enumerate() {
            match node {
                ModelNode::Input { slot } if *slot as usize >= self.inputs.len() => {
                    return Err(Error::ModelFormat(format!("node {} reads unknown input {}", position, slot)));
                }
                ModelNode::Function { function, args } => {
                    if args.len() != function.arity() || args.iter().any(|a| *a >= position) {
                        return Err(Error::ModelFormat(format!("node {} has invalid arguments", position)));
                    }
                }
                _ => {}
            }
        }
        if self.learners.iter().any(|l| *l >= self.nodes.len()) {
            return Err(Error::ModelFormat("weak learner out of range".to_string()));
        }
        let outputs = self.outputs();
        for (index, vote) in self.votes.iter().enumerate() {
            let fits = match vote {
                Vote::Scalar(_) => self.labels.is_empty(),
                Vote::Labels(values) => !self.labels.is_empty() && values.len() == outputs,
            };
            if !fits {
                return Err(Error::ModelFormat(format!(
                    "vote {} has {} values, the model predicts {}",
                    index,
                    vote.outputs(),
                    outputs
                )));
            }
        }
        Ok(())
    }

    /// Ensemble output for one example, one value per output: the sum of
    /// the votes of the weak learners whose condition holds, minus those
    /// whose condition fails.
    pub fn scores(&self, row: &[Value]) -> Result<Vec<f64>> {
        if row.len() != self.inputs.len() {
            return Err(Error::ExampleShape {
                index: 0,
                expected: self.inputs.len(),
                actual: row.len(),
            });
        }
        let mut values: Vec<Value> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let value = match node {
                ModelNode::Input { slot } => row[*slot as usize],
                ModelNode::Constant { value, .. } => *value,
                ModelNode::Function { function, args } => {
                    let cells: SmallVec<[Value; 2]> = args.iter().map(|a| values[*a]).collect();
                    function.apply(&cells)
                }
            };
            values.push(value);
        }
        let mut scores = vec![0.0; self.outputs()];
        for (l, vote) in self.learners.iter().zip(&self.votes) {
            let sign = match values[*l] {
                Value::Bool(true) => 1.0,
                Value::Bool(false) => -1.0,
                _ => continue,
            };
            for (score, v) in scores.iter_mut().zip(vote.as_slice()) {
                *score += sign * v;
            }
        }
        Ok(scores)
    }

    /// Ensemble output of a single-output model.
    pub fn predict(&self, row: &[Value]) -> Result<f64> {
        if !self.labels.is_empty() {
            return Err(Error::ModelFormat("multi-class models predict with classify".to_string()));
        }
        Ok(self.scores(row)?.first().copied().unwrap_or(0.0))
    }

    /// Class label with the highest score, the first one on ties.
    pub fn classify(&self, row: &[Value]) -> Result<u32> {
        if self.labels.is_empty() {
            return Err(Error::ModelFormat("only multi-class models classify".to_string()));
        }
        let scores = self.scores(row)?;
        let mut best = 0;
        for (label, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = label;
            }
        }
        Ok(best as u32)
    }

    pub fn predict_rows(&self, rows: &[Vec<Value>]) -> Result<Vec<f64>> {
        rows.iter().map(|r| self.predict(r)).collect()
    }

    fn render(&self, position: usize) -> String {
        match &self.nodes[position] {
            ModelNode::Input { slot } => self.inputs[*slot as usize].name.clone(),
            ModelNode::Constant { value, .. } => match value {
                Value::Bool(b) => b.to_string(),
                Value::Scalar(x) => x.to_string(),
                Value::Label(l) => format!("#{}", l),
                Value::Missing => "missing".to_string(),
            },
            ModelNode::Function { function, args } => {
                function.render(&args.iter().map(|a| self.render(*a)).collect::<Vec<_>>())
            }
        }
    }

    /// One line per weak learner: `vote: condition`.
    pub fn describe(&self) -> String {
        self.learners
            .iter()
            .zip(&self.votes)
            .map(|(l, v)| format!("{}: {}", v, self.render(*l)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let model: Model = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        model.validate()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionKind;
    use crate::problem::Problem;

    fn stump_model() -> Model {
        let p = Problem::new()
            .with_input("x", Type::Double)
            .with_input("y", Type::Double)
            .with_function(FunctionKind::Add);
        let mut g = Graph::new(&p, usize::MAX).unwrap();
        let (x, y) = (g.node_at(0), g.node_at(1));
        let sum = g.intern(Node::function(Function::Add, &[x, y])).unwrap();
        let stump = g.intern(Node::function(Function::Stump { threshold: 1.0 }, &[sum])).unwrap();
        let on_x = g.intern(Node::function(Function::Stump { threshold: 0.0 }, &[x])).unwrap();
        let yields = [g.intern(Node::Yield(stump)).unwrap(), g.intern(Node::Yield(on_x)).unwrap()];
        Model::from_graph(&g, &p.inputs, &[], &yields, &[Vote::Scalar(0.5), Vote::Scalar(0.25)]).unwrap()
    }

    #[test]
    fn test_export_shares_subexpressions() {
        let model = stump_model();
        // x, y, x + y, stump, stump on x
        assert_eq!(model.nodes.len(), 5);
        assert_eq!(model.learners, vec![3, 4]);
        assert!(model.validate().is_ok());
        assert_eq!(model.describe(), "+0.5000: ((x + y) >= 1)\n+0.2500: (x >= 0)");
    }

    #[test]
    fn test_predict() {
        let model = stump_model();
        assert_eq!(model.predict(&[Value::Scalar(1.0), Value::Scalar(1.0)]).unwrap(), 0.75);
        assert_eq!(model.predict(&[Value::Scalar(-1.0), Value::Scalar(0.0)]).unwrap(), -0.75);
        assert_eq!(model.predict(&[Value::Missing, Value::Scalar(0.0)]).unwrap(), 0.0);
        assert!(matches!(
            model.predict(&[Value::Scalar(1.0)]),
            Err(Error::ExampleShape { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_classify() {
        let mut model = stump_model();
        model.labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        model.votes = vec![Vote::Labels(vec![1.0, -1.0, -1.0]), Vote::Labels(vec![-0.5, 0.5, -0.5])];
        assert!(model.validate().is_ok());
        // both conditions hold: [0.5, -0.5, -1.5]
        assert_eq!(model.classify(&[Value::Scalar(1.0), Value::Scalar(1.0)]).unwrap(), 0);
        // both fail: [-0.5, 0.5, 1.5]
        assert_eq!(model.classify(&[Value::Scalar(-1.0), Value::Scalar(-1.0)]).unwrap(), 2);
        // all missing: a tie, the first label wins
        assert_eq!(model.classify(&[Value::Missing, Value::Missing]).unwrap(), 0);
        assert!(model.predict(&[Value::Scalar(1.0), Value::Scalar(1.0)]).is_err());
        assert!(stump_model().classify(&[Value::Scalar(1.0), Value::Scalar(1.0)]).is_err());
        assert_eq!(
            model.describe(),
            "[+1.0000, -1.0000, -1.0000]: ((x + y) >= 1)\n[-0.5000, +0.5000, -0.5000]: (x >= 0)"
        );
    }

    #[test]
    fn test_validate_rejects_mismatched_votes() {
        let mut model = stump_model();
        model.votes[1] = Vote::Labels(vec![1.0, -1.0]);
        assert!(matches!(model.validate(), Err(Error::ModelFormat(_))));
        model.labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        model.votes = vec![Vote::Labels(vec![1.0, -1.0, 0.0]), Vote::Labels(vec![1.0, -1.0])];
        assert!(matches!(model.validate(), Err(Error::ModelFormat(_))));
    }

    #[test]
    fn test_validate_rejects_forward_references() {
        let mut model = stump_model();
        model.nodes[2] = ModelNode::Function {
            function: Function::Add,
            args: vec![0, 3],
        };
        assert!(matches!(model.validate(), Err(Error::ModelFormat(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let model = stump_model();
        let text = serde_json::to_string(&model).unwrap();
        let back: Model = serde_json::from_str(&text).unwrap();
        assert_eq!(back, model);
    }
}
