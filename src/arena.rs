//! Arena - Graph Storage for Feature Programs
//!
//! Every node ever built lives in one arena and is interned by its
//! `StructuralKey`, so two structurally equal nodes share one `NodeId` and
//! therefore one `NodeCache`. On top of the arena, the graph keeps an ordered
//! sequence of nodes (the program graph proper) which builders grow and
//! shrink with `push_node` / `pop_node`.

use crate::cache::{CacheStore, NodeCache, SortedValues, Split};
use crate::error::{Error, Result};
use crate::functions::Function;
use crate::problem::Problem;
use crate::samples::{Samples, Value, RAW_FALSE, RAW_TRUE};
use crate::types::Type;
use log::trace;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;

/// Lightweight NodeId
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Input { slot: u32 },
    Constant { ty: Type, value: Value },
    /// One value per class label, the vote of a multi-class weak learner.
    VectorConstant(Vec<f64>),
    Function { function: Function, args: SmallVec<[NodeId; 2]> },
    /// Selects `success`, `failure` or `missing` per example depending on the
    /// boolean `condition`.
    Test {
        condition: NodeId,
        success: NodeId,
        failure: NodeId,
        missing: NodeId,
    },
    /// Running sum over an open-ended list of terms (the ensemble output).
    /// Its type is fixed at creation, see `Graph::new_sum`.
    Sum,
    /// Marks `0` as a finished weak-learner candidate.
    Yield(NodeId),
}

impl Node {
    pub fn function(function: Function, args: &[NodeId]) -> Self {
        Node::Function {
            function,
            args: args.iter().copied().collect(),
        }
    }

    pub fn is_yield(&self) -> bool {
        matches!(self, Node::Yield(_))
    }
}

/// Canonical structural encoding of a node. Argument ids are themselves
/// interned, so comparing them compares the argument structures recursively
/// down to the input slots.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum StructuralKey {
    Input(u32),
    Constant(Type, Option<u64>),
    VectorConstant(Vec<u64>),
    Function(Function, SmallVec<[NodeId; 2]>),
    Test([NodeId; 4]),
    Sum(u32),
    Yield(NodeId),
}

fn constant_bits(value: &Value) -> Option<u64> {
    match value {
        Value::Bool(b) => Some(*b as u64),
        // +0.0 and -0.0 compute identically
        Value::Scalar(x) => Some(if *x == 0.0 { 0 } else { x.to_bits() }),
        Value::Label(l) => Some(*l as u64),
        Value::Missing => None,
    }
}

fn vector_bits(values: &[f64]) -> Vec<u64> {
    values.iter().map(|x| constant_bits(&Value::Scalar(*x)).unwrap_or(0)).collect()
}

/// Structural key of every node but sums, which are never shared.
fn shared_key(node: &Node) -> Option<StructuralKey> {
    Some(match node {
        Node::Input { slot } => StructuralKey::Input(*slot),
        Node::Constant { ty, value } => StructuralKey::Constant(*ty, constant_bits(value)),
        Node::VectorConstant(values) => StructuralKey::VectorConstant(vector_bits(values)),
        Node::Function { function, args } => StructuralKey::Function(*function, args.clone()),
        Node::Test {
            condition,
            success,
            failure,
            missing,
        } => StructuralKey::Test([*condition, *success, *failure, *missing]),
        Node::Sum => return None,
        Node::Yield(arg) => StructuralKey::Yield(*arg),
    })
}

#[derive(Clone, Debug)]
struct NodeEntry {
    node: Node,
    ty: Type,
    name: String,
}

pub struct Graph {
    entries: Vec<NodeEntry>,
    interner: FxHashMap<StructuralKey, NodeId>,
    input_types: Vec<Type>,
    input_names: Vec<String>,
    /// Position of each arena node in `sequence`, if present.
    positions: Vec<Option<u32>>,
    sequence: Vec<NodeId>,
    sum_terms: FxHashMap<NodeId, Vec<NodeId>>,
    num_sums: u32,
    caches: CacheStore,
    num_examples: [usize; 2],
    columns: [Vec<Samples>; 2],
}

impl Graph {
    /// Builds the initial graph of a problem: one node per input slot and
    /// per constant.
    pub fn new(problem: &Problem, cache_budget: usize) -> Result<Self> {
        problem.validate()?;
        let mut g = Self {
            entries: Vec::with_capacity(1024),
            interner: FxHashMap::default(),
            input_types: problem.inputs.iter().map(|i| i.ty).collect(),
            input_names: problem.inputs.iter().map(|i| i.name.clone()).collect(),
            positions: Vec::with_capacity(1024),
            sequence: Vec::new(),
            sum_terms: FxHashMap::default(),
            num_sums: 0,
            caches: CacheStore::new(cache_budget),
            num_examples: [0, 0],
            columns: [Vec::new(), Vec::new()],
        };
        for slot in 0..problem.inputs.len() {
            g.push_node(Node::Input { slot: slot as u32 })?;
        }
        for constant in &problem.constants {
            g.push_node(Node::Constant {
                ty: constant.ty,
                value: constant.value,
            })?;
        }
        Ok(g)
    }

    fn key_of(&mut self, node: &Node) -> StructuralKey {
        match shared_key(node) {
            Some(key) => key,
            None => {
                self.num_sums += 1;
                StructuralKey::Sum(self.num_sums - 1)
            }
        }
    }

    fn check_arg(&self, node: &Node, arg: NodeId) -> Result<Type> {
        match self.entries.get(arg.index()) {
            Some(entry) => Ok(entry.ty),
            None => Err(Error::DanglingArgument {
                node: format!("{:?}", node),
                argument: arg.0,
            }),
        }
    }

    /// Type-checks `node` against the arena.
    fn infer_type(&self, node: &Node) -> Result<Type> {
        match node {
            Node::Input { slot } => self.input_types.get(*slot as usize).copied().ok_or_else(|| Error::ExampleShape {
                index: 0,
                expected: self.input_types.len(),
                actual: *slot as usize + 1,
            }),
            Node::Constant { ty, .. } => Ok(*ty),
            Node::VectorConstant(values) => Ok(Type::Vector(values.len() as u32)),
            Node::Function { function, args } => {
                if args.len() != function.arity() {
                    return Err(Error::ArityMismatch {
                        function: function.render(&vec!["_".to_string(); function.arity()]),
                        expected: function.arity(),
                        actual: args.len(),
                    });
                }
                let types = args
                    .iter()
                    .map(|a| self.check_arg(node, *a))
                    .collect::<Result<Vec<Type>>>()?;
                function.output_type(&types).ok_or_else(|| Error::IllTypedNode {
                    node: function.render(&types.iter().map(|t| format!("{:?}", t)).collect::<Vec<_>>()),
                    args: types.clone(),
                })
            }
            Node::Test {
                condition,
                success,
                failure,
                missing,
            } => {
                let cond = self.check_arg(node, *condition)?;
                let branches = [*success, *failure, *missing]
                    .iter()
                    .map(|a| self.check_arg(node, *a))
                    .collect::<Result<Vec<Type>>>()?;
                let output = match branches[0] {
                    Type::Vector(labels) if branches.iter().all(|t| *t == Type::Vector(labels)) => Some(branches[0]),
                    _ if branches.iter().all(|t| t.is_scalar()) => Some(Type::Double),
                    _ => None,
                };
                match output {
                    Some(ty) if cond.is_bool() => Ok(ty),
                    _ => {
                        let mut args = vec![cond];
                        args.extend(branches);
                        Err(Error::IllTypedNode {
                            node: "test".to_string(),
                            args,
                        })
                    }
                }
            }
            // sums are typed by new_sum, never interned
            Node::Sum => Ok(Type::Double),
            Node::Yield(arg) => self.check_arg(node, *arg),
        }
    }

    fn render(&self, node: &Node) -> String {
        match node {
            Node::Input { slot } => self.input_names[*slot as usize].clone(),
            Node::Constant { value, .. } => match value {
                Value::Bool(b) => b.to_string(),
                Value::Scalar(x) => format!("{}", x),
                Value::Label(l) => format!("#{}", l),
                Value::Missing => "missing".to_string(),
            },
            Node::VectorConstant(values) => {
                let cells: Vec<String> = values.iter().map(|x| format!("{}", x)).collect();
                format!("[{}]", cells.join(", "))
            }
            Node::Function { function, args } => {
                let names: Vec<String> = args.iter().map(|a| self.entries[a.index()].name.clone()).collect();
                function.render(&names)
            }
            Node::Test {
                condition,
                success,
                failure,
                missing,
            } => format!(
                "test({}, {}, {}, {})",
                self.name(*condition),
                self.name(*success),
                self.name(*failure),
                self.name(*missing)
            ),
            Node::Sum => format!("sum#{}", self.num_sums.saturating_sub(1)),
            Node::Yield(arg) => format!("yield {}", self.name(*arg)),
        }
    }

    /// Folds a function applied to constants into a constant.
    fn fold_constants(&self, node: Node, ty: Type) -> Node {
        if let Node::Function { function, args } = &node {
            let mut cells: SmallVec<[Value; 2]> = SmallVec::new();
            for arg in args {
                match &self.entries[arg.index()].node {
                    Node::Constant { value, .. } => cells.push(*value),
                    _ => return node,
                }
            }
            return Node::Constant {
                ty,
                value: function.apply(&cells),
            };
        }
        node
    }

    /// Looks up or creates the arena node for `node`. The node is not added
    /// to the graph sequence.
    pub fn intern(&mut self, node: Node) -> Result<NodeId> {
        let ty = self.infer_type(&node)?;
        let node = self.fold_constants(node, ty);
        let key = self.key_of(&node);
        if let Some(&id) = self.interner.get(&key) {
            return Ok(id);
        }
        let id = NodeId(self.entries.len() as u32);
        let name = self.render(&node);
        trace!("intern {:?} as {}", id, name);
        self.entries.push(NodeEntry { node, ty, name });
        self.positions.push(None);
        self.interner.insert(key, id);
        Ok(id)
    }

    /// Id `node` would intern to, without creating it. Functions of
    /// constants are looked up as their folded constant.
    pub fn lookup(&self, node: &Node) -> Option<NodeId> {
        let key = match node {
            Node::Function { .. } => {
                let ty = self.infer_type(node).ok()?;
                shared_key(&self.fold_constants(node.clone(), ty))?
            }
            _ => shared_key(node)?,
        };
        self.interner.get(&key).copied()
    }

    /// Interns `node` and appends it to the graph sequence unless already
    /// present. Every argument must already be in the graph.
    pub fn push_node(&mut self, node: Node) -> Result<NodeId> {
        let id = self.intern(node)?;
        if !self.contains(id) {
            self.push_id(id)?;
        }
        Ok(id)
    }

    /// Appends an interned node to the graph sequence.
    pub fn push_id(&mut self, id: NodeId) -> Result<()> {
        debug_assert!(!self.contains(id), "node {:?} pushed twice", id);
        for dep in self.dependencies(id) {
            if !self.contains(dep) {
                return Err(Error::DanglingArgument {
                    node: self.name(id).to_string(),
                    argument: dep.0,
                });
            }
        }
        self.positions[id.index()] = Some(self.sequence.len() as u32);
        self.sequence.push(id);
        Ok(())
    }

    /// Pushes `id` and, first, any of its arguments missing from the graph.
    pub fn ensure_in_graph(&mut self, id: NodeId) -> Result<()> {
        enum Frame {
            Enter(NodeId),
            Exit(NodeId),
        }
        let mut stack = vec![Frame::Enter(id)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(n) => {
                    if self.contains(n) {
                        continue;
                    }
                    stack.push(Frame::Exit(n));
                    for dep in self.dependencies(n) {
                        stack.push(Frame::Enter(dep));
                    }
                }
                Frame::Exit(n) => {
                    if !self.contains(n) {
                        self.push_id(n)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes the most recently pushed node from the graph sequence.
    pub fn pop_node(&mut self) -> Option<NodeId> {
        let id = self.sequence.pop()?;
        self.positions[id.index()] = None;
        Some(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.positions.get(id.index()).map_or(false, |p| p.is_some())
    }

    pub fn num_nodes(&self) -> usize {
        self.sequence.len()
    }

    pub fn node_at(&self, position: usize) -> NodeId {
        self.sequence[position]
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.sequence
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.entries[id.index()].node
    }

    pub fn type_of(&self, id: NodeId) -> Type {
        self.entries[id.index()].ty
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.entries[id.index()].name
    }

    pub fn input_types(&self) -> &[Type] {
        &self.input_types
    }

    pub fn input_node(&self, slot: usize) -> Option<NodeId> {
        self.lookup(&Node::Input { slot: slot as u32 })
    }

    pub fn constant(&mut self, ty: Type, value: Value) -> Result<NodeId> {
        self.intern(Node::Constant { ty, value })
    }

    pub fn vector_constant(&mut self, values: &[f64]) -> Result<NodeId> {
        self.intern(Node::VectorConstant(values.to_vec()))
    }

    pub fn dependencies(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        match &self.entries[id.index()].node {
            Node::Input { .. } | Node::Constant { .. } | Node::VectorConstant(_) => SmallVec::new(),
            Node::Function { args, .. } => args.iter().copied().collect(),
            Node::Test {
                condition,
                success,
                failure,
                missing,
            } => smallvec![*condition, *success, *failure, *missing],
            Node::Sum => self.sum_terms.get(&id).map(|t| t.iter().copied().collect()).unwrap_or_default(),
            Node::Yield(arg) => smallvec![*arg],
        }
    }

    /// Creates an empty sum of `ty` terms, `Double` or a vector type. Sums
    /// are never shared between callers.
    pub fn new_sum(&mut self, ty: Type) -> NodeId {
        let key = self.key_of(&Node::Sum);
        let id = NodeId(self.entries.len() as u32);
        self.entries.push(NodeEntry {
            node: Node::Sum,
            ty,
            name: String::new(),
        });
        self.entries[id.index()].name = self.render(&Node::Sum);
        self.positions.push(None);
        self.interner.insert(key, id);
        self.sum_terms.insert(id, Vec::new());
        id
    }

    pub fn sum_terms(&self, sum: NodeId) -> &[NodeId] {
        self.sum_terms.get(&sum).map(|t| t.as_slice()).unwrap_or(&[])
    }

    /// Appends `term` to `sum`, updating cached sums in place.
    pub fn add_sum_term(&mut self, sum: NodeId, term: NodeId) -> Result<()> {
        let ty = self.type_of(term);
        let sum_ty = self.type_of(sum);
        let compatible = match sum_ty {
            Type::Vector(_) => ty == sum_ty,
            _ => ty.is_scalar(),
        };
        if !compatible || !matches!(self.node(sum), Node::Sum) {
            return Err(Error::IllTypedNode {
                node: self.name(sum).to_string(),
                args: vec![ty],
            });
        }
        for split in [Split::Training, Split::Validation] {
            if !self.is_cached(sum, split) {
                continue;
            }
            let delta: Vec<f64> = match self.compute(term, split).values() {
                Some(v) => v.to_vec(),
                None => continue,
            };
            let current = self.caches.get(sum).and_then(|c| c.samples(split)).cloned();
            if let Some(mut samples) = current {
                if let Some(values) = samples.values_mut() {
                    for (v, d) in values.iter_mut().zip(&delta) {
                        if !d.is_nan() {
                            *v += d;
                        }
                    }
                }
                self.caches.set_samples(sum, split, samples, sum_ty.is_scalar());
            }
        }
        if let Some(terms) = self.sum_terms.get_mut(&sum) {
            terms.push(term);
        }
        Ok(())
    }

    pub fn num_examples(&self, split: Split) -> usize {
        self.num_examples[split.index()]
    }

    /// Loads example rows for `split` and resizes every cache accordingly.
    pub fn set_examples(&mut self, split: Split, rows: &[Vec<Value>]) -> Result<()> {
        for (index, row) in rows.iter().enumerate() {
            if row.len() != self.input_types.len() {
                return Err(Error::ExampleShape {
                    index,
                    expected: self.input_types.len(),
                    actual: row.len(),
                });
            }
            for (slot, (cell, ty)) in row.iter().zip(&self.input_types).enumerate() {
                if !cell.fits(*ty) {
                    return Err(Error::ExampleType { index, slot, ty: *ty });
                }
            }
        }
        self.columns[split.index()] = self
            .input_types
            .iter()
            .enumerate()
            .map(|(slot, ty)| Samples::column(*ty, rows, slot))
            .collect();
        self.resize_samples(split, rows.len());
        Ok(())
    }

    /// Sets the active example count of `split`; every cached column of that
    /// split is dropped and recomputed lazily.
    pub fn resize_samples(&mut self, split: Split, n: usize) {
        self.num_examples[split.index()] = n;
        self.caches.clear_split(split);
    }

    fn is_cached(&self, id: NodeId, split: Split) -> bool {
        let n = self.num_examples[split.index()];
        self.caches
            .get(id)
            .and_then(|c| c.samples(split))
            .map_or(false, |s| s.len() == n)
    }

    pub fn cache(&self, id: NodeId) -> Option<&NodeCache> {
        self.caches.get(id)
    }

    pub fn caches(&self) -> &CacheStore {
        &self.caches
    }

    /// Computes (or returns the memoized) values of `id` on `split`.
    pub fn compute(&mut self, id: NodeId, split: Split) -> &Samples {
        enum Frame {
            Enter(NodeId),
            Exit(NodeId),
        }
        let mut stack = vec![Frame::Enter(id)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(n) => {
                    if self.is_cached(n, split) {
                        continue;
                    }
                    stack.push(Frame::Exit(n));
                    for dep in self.dependencies(n) {
                        stack.push(Frame::Enter(dep));
                    }
                }
                Frame::Exit(n) => {
                    // shared dependencies may already be done
                    if self.is_cached(n, split) {
                        continue;
                    }
                    let samples = self.evaluate(n, split);
                    let scalar = self.type_of(n).is_scalar();
                    self.caches.set_samples(n, split, samples, scalar);
                }
            }
        }
        match self.caches.get(id).and_then(|c| c.samples(split)) {
            Some(samples) => samples,
            None => unreachable!("node {:?} computed above", id),
        }
    }

    fn cached(&self, id: NodeId, split: Split) -> Option<&Samples> {
        self.caches.get(id).and_then(|c| c.samples(split))
    }

    /// Evaluates one node from its (already cached) dependencies.
    fn evaluate(&self, id: NodeId, split: Split) -> Samples {
        let n = self.num_examples[split.index()];
        let entry = &self.entries[id.index()];
        let missing = || Samples::constant(entry.ty, Value::Missing, n);
        match &entry.node {
            Node::Input { slot } => match self.columns[split.index()].get(*slot as usize) {
                Some(column) if column.len() == n => column.clone(),
                Some(column) => Samples::column(
                    entry.ty,
                    &(0..n)
                        .map(|i| vec![if i < column.len() { column.get(i) } else { Value::Missing }])
                        .collect::<Vec<_>>(),
                    0,
                ),
                None => missing(),
            },
            Node::Constant { ty, value } => Samples::constant(*ty, *value, n),
            Node::VectorConstant(values) => Samples::Vector {
                width: values.len(),
                values: values.iter().copied().cycle().take(values.len() * n).collect(),
            },
            Node::Function { function, args } => {
                let columns: Option<SmallVec<[&Samples; 2]>> = args.iter().map(|a| self.cached(*a, split)).collect();
                match columns {
                    Some(columns) => function.evaluate(&columns, entry.ty, n),
                    None => missing(),
                }
            }
            Node::Test {
                condition,
                success,
                failure,
                missing: missing_branch,
            } => {
                let parts = (
                    self.cached(*condition, split).and_then(|s| s.as_bools()),
                    self.cached(*success, split),
                    self.cached(*failure, split),
                    self.cached(*missing_branch, split),
                );
                match (parts, entry.ty) {
                    ((Some(cond), Some(s), Some(f), Some(m)), Type::Vector(_)) => {
                        let width = entry.ty.width();
                        let mut values = Vec::with_capacity(n * width);
                        for (i, c) in cond.iter().enumerate() {
                            let branch = match *c {
                                RAW_TRUE => s,
                                RAW_FALSE => f,
                                _ => m,
                            };
                            match branch.row(i) {
                                Some(row) => values.extend_from_slice(row),
                                None => values.extend(std::iter::repeat(f64::NAN).take(width)),
                            }
                        }
                        Samples::Vector { width, values }
                    }
                    ((Some(cond), Some(s), Some(f), Some(m)), _) => Samples::Scalar(
                        cond.iter()
                            .enumerate()
                            .map(|(i, c)| match *c {
                                RAW_TRUE => s.get(i).as_scalar(),
                                RAW_FALSE => f.get(i).as_scalar(),
                                _ => m.get(i).as_scalar(),
                            })
                            .collect(),
                    ),
                    _ => missing(),
                }
            }
            Node::Sum => {
                let width = entry.ty.width();
                let mut values = vec![0.0; n * width];
                for term in self.sum_terms(id) {
                    if let Some(t) = self.cached(*term, split).and_then(|s| s.values()) {
                        for (v, d) in values.iter_mut().zip(t) {
                            if !d.is_nan() {
                                *v += d;
                            }
                        }
                    }
                }
                match entry.ty {
                    Type::Vector(_) => Samples::Vector { width, values },
                    _ => Samples::Scalar(values),
                }
            }
            Node::Yield(arg) => self.cached(*arg, split).cloned().unwrap_or_else(missing),
        }
    }

    /// Training values of a scalar node sorted increasingly (ties by example
    /// index), missing values excluded. Cached until the training set changes.
    pub fn sorted_values(&mut self, id: NodeId) -> Option<SortedValues> {
        let scalar = match self.caches.get(id) {
            Some(cache) => cache.is_convertible_to_scalar(),
            None => self.type_of(id).is_scalar(),
        };
        if !scalar {
            return None;
        }
        if self.is_cached(id, Split::Training) {
            if let Some(sorted) = self.caches.get(id).and_then(|c| c.sorted_values()) {
                return Some(Arc::clone(sorted));
            }
        }
        let mut sorted: Vec<(u32, f64)> = match self.compute(id, Split::Training) {
            Samples::Scalar(v) => v
                .iter()
                .enumerate()
                .filter(|(_, x)| !x.is_nan())
                .map(|(i, x)| (i as u32, *x))
                .collect(),
            _ => return None,
        };
        sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        let sorted = Arc::new(sorted);
        self.caches.set_sorted_values(id, Arc::clone(&sorted));
        Some(sorted)
    }

    pub fn set_score(&mut self, id: NodeId, score: f64) {
        let scalar = self.type_of(id).is_scalar();
        self.caches.get_or_create(id, scalar);
        self.caches.set_score(id, score);
    }

    /// Score memoized since the last `invalidate_scores`.
    pub fn score(&self, id: NodeId) -> Option<f64> {
        self.caches.get(id).and_then(|c| c.score())
    }

    pub fn invalidate_scores(&mut self) {
        self.caches.invalidate_scores();
    }

    /// Evicts caches of nodes outside the graph until the budget is met.
    /// Nodes in the graph sequence, sums and their terms are kept.
    pub fn evict(&mut self) -> usize {
        let Graph {
            caches,
            positions,
            sum_terms,
            ..
        } = self;
        caches.evict(|id| {
            positions.get(id.index()).map_or(false, |p| p.is_some())
                || sum_terms.contains_key(&id)
                || sum_terms.values().any(|terms| terms.contains(&id))
        })
    }
}
