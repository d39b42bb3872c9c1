//! Type-level automaton over (step, type stack) states.
//!
//! A `TypeSearchSpace` describes which push / apply / yield actions a program
//! builder may take at each step. It is built once per problem by forward
//! closure from the empty stack, then pruned so that every remaining state
//! can still reach a yield.

use crate::error::{Error, Result};
use crate::functions::Function;
use crate::problem::Problem;
use crate::types::{format_stack, Type};
use log::debug;
use rustc_hash::FxHashMap;
use std::collections::{BTreeSet, VecDeque};

pub type StateId = usize;

#[derive(Clone, Debug)]
pub struct TypeState {
    depth: usize,
    stack: Vec<Type>,
    push: Vec<(Type, StateId)>,
    apply: Vec<(Function, StateId)>,
    yieldable: bool,
}

impl TypeState {
    fn new(depth: usize, stack: Vec<Type>) -> Self {
        Self {
            depth,
            stack,
            push: Vec::new(),
            apply: Vec::new(),
            yieldable: false,
        }
    }

    pub fn pushes(&self) -> &[(Type, StateId)] {
        &self.push
    }

    pub fn applies(&self) -> &[(Function, StateId)] {
        &self.apply
    }

    pub fn is_yieldable(&self) -> bool {
        self.yieldable
    }

    pub fn push_target(&self, ty: Type) -> Option<StateId> {
        self.push.iter().find(|(t, _)| *t == ty).map(|(_, s)| *s)
    }

    pub fn apply_target(&self, function: &Function) -> Option<StateId> {
        self.apply.iter().find(|(f, _)| f == function).map(|(_, s)| *s)
    }

    pub fn has_actions(&self) -> bool {
        self.yieldable || !self.push.is_empty() || !self.apply.is_empty()
    }

    fn describe(&self) -> String {
        let mut s = format!(
            "[{}] {} -> {} push actions, {} apply actions",
            self.depth,
            format_stack(&self.stack),
            self.push.len(),
            self.apply.len()
        );
        if self.yieldable {
            s.push_str(", yield action");
        }
        s
    }
}

pub struct TypeSearchSpace {
    states: Vec<TypeState>,
    max_steps: usize,
}

impl TypeSearchSpace {
    /// Builds and prunes the search space of `problem` for programs of at
    /// most `max_steps` actions.
    pub fn new(problem: &Problem, max_steps: usize) -> Result<Self> {
        let mut space = Self::unpruned(problem, max_steps)?;
        space.prune()?;
        debug!("type search space: {} states\n{}", space.num_states(), space.describe());
        Ok(space)
    }

    /// Forward closure without pruning. Repeats until the set of pushable
    /// types stops growing, since applies can produce new types.
    pub fn unpruned(problem: &Problem, max_steps: usize) -> Result<Self> {
        problem.validate()?;
        let mut types: BTreeSet<Type> = problem
            .inputs
            .iter()
            .map(|i| i.ty)
            .chain(problem.constants.iter().map(|c| c.ty))
            .collect();
        loop {
            let (space, produced) = Self::explore(problem, &types, max_steps);
            let before = types.len();
            types.extend(produced);
            if types.len() == before {
                return Ok(space);
            }
        }
    }

    fn explore(problem: &Problem, types: &BTreeSet<Type>, max_steps: usize) -> (Self, BTreeSet<Type>) {
        let enum_sizes = problem.enum_sizes();
        let mut states = vec![TypeState::new(0, Vec::new())];
        let mut index: FxHashMap<(usize, Vec<Type>), StateId> = FxHashMap::default();
        index.insert((0, Vec::new()), 0);
        let mut produced = BTreeSet::new();
        let mut queue = VecDeque::from([0]);

        let mut target = |states: &mut Vec<TypeState>, queue: &mut VecDeque<StateId>, depth: usize, stack: Vec<Type>| {
            *index.entry((depth, stack.clone())).or_insert_with(|| {
                states.push(TypeState::new(depth, stack));
                queue.push_back(states.len() - 1);
                states.len() - 1
            })
        };

        while let Some(id) = queue.pop_front() {
            let depth = states[id].depth;
            if depth >= max_steps {
                continue;
            }
            let stack = states[id].stack.clone();

            // every pushed value must still be consumable before the budget runs out
            if max_steps - depth > stack.len() + 1 {
                for ty in types {
                    let mut next = stack.clone();
                    next.push(*ty);
                    let child = target(&mut states, &mut queue, depth + 1, next);
                    states[id].push.push((*ty, child));
                }
            }

            for kind in &problem.functions {
                if !kind.accepts_stack(&stack) {
                    continue;
                }
                let first = stack.len() - kind.arity();
                let inputs = &stack[first..];
                for function in kind.instantiate(inputs, &enum_sizes) {
                    let Some(output) = function.output_type(inputs) else { continue; };
                    produced.insert(output);
                    let mut next = stack[..first].to_vec();
                    next.push(output);
                    let child = target(&mut states, &mut queue, depth + 1, next);
                    states[id].apply.push((function, child));
                }
            }

            states[id].yieldable = stack.len() == 1 && problem.accepts_target_type(stack[0]);
        }
        (Self { states, max_steps }, produced)
    }

    /// Removes every state from which no yield is reachable, then compacts
    /// the state indices. Fails if the root itself is removed.
    pub fn prune(&mut self) -> Result<()> {
        let mut order: Vec<StateId> = (0..self.states.len()).collect();
        // transitions always go one step deeper
        order.sort_by(|a, b| self.states[*b].depth.cmp(&self.states[*a].depth));

        let mut prunable = vec![false; self.states.len()];
        for id in order {
            let state = &mut self.states[id];
            state.push.retain(|(_, child)| !prunable[*child]);
            state.apply.retain(|(_, child)| !prunable[*child]);
            prunable[id] = !state.has_actions();
        }
        if prunable[0] {
            return Err(Error::EmptySearchSpace {
                max_steps: self.max_steps,
            });
        }

        let mut remap = vec![usize::MAX; self.states.len()];
        let mut kept = Vec::with_capacity(self.states.len());
        for (id, state) in std::mem::take(&mut self.states).into_iter().enumerate() {
            if !prunable[id] {
                remap[id] = kept.len();
                kept.push(state);
            }
        }
        for state in &mut kept {
            for (_, child) in state.push.iter_mut() {
                *child = remap[*child];
            }
            for (_, child) in state.apply.iter_mut() {
                *child = remap[*child];
            }
        }
        self.states = kept;
        Ok(())
    }

    pub fn root(&self) -> StateId {
        0
    }

    pub fn state(&self, id: StateId) -> &TypeState {
        &self.states[id]
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Types that may ever be pushed.
    pub fn pushable_types(&self) -> BTreeSet<Type> {
        self.states.iter().flat_map(|s| s.push.iter().map(|(t, _)| *t)).collect()
    }

    pub fn describe(&self) -> String {
        self.states.iter().map(TypeState::describe).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionKind;

    #[test]
    fn test_single_input_space() {
        let p = Problem::new().with_input("x", Type::Double);
        let space = TypeSearchSpace::new(&p, 2).unwrap();
        assert_eq!(space.num_states(), 2);
        let root = space.state(space.root());
        assert!(!root.is_yieldable());
        let child = space.state(root.push_target(Type::Double).unwrap());
        assert!(child.is_yieldable());
        assert_eq!(space.describe(), "[0] {} -> 1 push actions, 0 apply actions\n[1] {Double} -> 0 push actions, 0 apply actions, yield action");
    }

    #[test]
    fn test_type_fixpoint_makes_outputs_pushable() {
        let p = Problem::new()
            .with_input("x", Type::Double)
            .with_functions(&[FunctionKind::Greater, FunctionKind::And]);
        let space = TypeSearchSpace::new(&p, 8).unwrap();
        assert!(space.pushable_types().contains(&Type::Bool));
    }

    #[test]
    fn test_push_requires_budget_to_consume_it() {
        let p = Problem::new().with_input("x", Type::Double).with_function(FunctionKind::Add);
        let space = TypeSearchSpace::unpruned(&p, 3).unwrap();
        let root = space.state(space.root());
        let one = space.state(root.push_target(Type::Double).unwrap());
        // {x} at step 1 has 2 steps left: a second push could never be reduced and yielded
        assert!(one.pushes().is_empty());
        assert!(one.is_yieldable());
    }

    #[test]
    fn test_pruning_removes_dead_ends() {
        let mut p = Problem::new();
        let color = p.add_enumeration("color", &["red", "green", "blue"]);
        let p = p
            .with_input("c", color)
            .with_input("x", Type::Double)
            .with_function(FunctionKind::EqualsLabel);
        // c == #k needs a push, an apply and a yield
        let unpruned = TypeSearchSpace::unpruned(&p, 2).unwrap();
        let pruned = TypeSearchSpace::new(&p, 2).unwrap();
        assert!(pruned.num_states() < unpruned.num_states());
        assert!(unpruned.state(unpruned.root()).push_target(color).is_some());
        assert!(pruned.state(pruned.root()).push_target(color).is_none());
        for id in 0..pruned.num_states() {
            assert!(pruned.state(id).has_actions());
        }

        let space = TypeSearchSpace::new(&p, 3).unwrap();
        let root = space.state(space.root());
        let after_c = space.state(root.push_target(color).unwrap());
        assert_eq!(after_c.applies().len(), 3);
        assert!(!after_c.is_yieldable());
    }

    #[test]
    fn test_empty_search_space_is_a_configuration_error() {
        let p = Problem::new().with_input("x", Type::Double);
        assert!(matches!(
            TypeSearchSpace::new(&p, 1),
            Err(Error::EmptySearchSpace { max_steps: 1 })
        ));
        assert!(TypeSearchSpace::new(&p, 2).is_ok());
    }
}
