//! Stack machine building one program completion on top of a graph.
//!
//! A `BuilderState` walks a `TypeSearchSpace`: each action consumes one step,
//! pushes or reduces nodes on its stack, and grows the graph when it creates a
//! new node. `perform` returns an `Undo` record that restores the exact prior
//! state, so backtracking search can share one graph.

use crate::arena::{Graph, Node, NodeId};
use crate::error::Result;
use crate::functions::Function;
use crate::search_space::{StateId, TypeSearchSpace};
use log::trace;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Push(NodeId),
    Apply(Function),
    Yield,
}

/// What `perform` changed, so `undo` can put it back.
#[derive(Clone, Debug)]
pub struct Undo {
    action: Action,
    previous_state: StateId,
    popped: SmallVec<[NodeId; 2]>,
    added: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuilderState {
    stack: Vec<NodeId>,
    state: StateId,
    steps: usize,
    yielded: Option<NodeId>,
}

impl BuilderState {
    pub fn new(space: &TypeSearchSpace) -> Self {
        Self {
            stack: Vec::new(),
            state: space.root(),
            steps: 0,
            yielded: None,
        }
    }

    pub fn stack(&self) -> &[NodeId] {
        &self.stack
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// The Yield node produced by the last action, if any.
    pub fn yielded(&self) -> Option<NodeId> {
        self.yielded
    }

    pub fn is_final(&self, graph: &Graph, space: &TypeSearchSpace) -> bool {
        self.yielded.is_some() || self.steps >= space.max_steps() || self.available_actions(graph, space).is_empty()
    }

    /// Final without having yielded.
    pub fn is_aborted(&self, graph: &Graph, space: &TypeSearchSpace) -> bool {
        self.yielded.is_none() && self.is_final(graph, space)
    }

    /// Top-of-stack arguments `function` would consume.
    fn arguments(&self, function: &Function) -> Option<&[NodeId]> {
        let arity = function.arity();
        if arity > self.stack.len() {
            return None;
        }
        Some(&self.stack[self.stack.len() - arity..])
    }

    /// Legal actions, without the ones that could only rebuild something the
    /// graph already has.
    pub fn available_actions(&self, graph: &Graph, space: &TypeSearchSpace) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.yielded.is_some() || self.steps >= space.max_steps() {
            return actions;
        }
        let state = space.state(self.state);

        for &id in graph.nodes() {
            let node = graph.node(id);
            if node.is_yield() {
                continue;
            }
            if state.push_target(graph.type_of(id)).is_some() {
                actions.push(Action::Push(id));
            }
        }

        for (function, _) in state.applies() {
            let Some(args) = self.arguments(function) else { continue; };
            if function.is_commutative() && args.windows(2).any(|w| w[0] > w[1]) {
                continue;
            }
            if function.all_same_arg_irrelevant() && args.len() > 1 && args.iter().all(|a| *a == args[0]) {
                continue;
            }
            if let Some(existing) = graph.lookup(&Node::function(*function, args)) {
                if graph.contains(existing) {
                    continue;
                }
            }
            actions.push(Action::Apply(*function));
        }

        if state.is_yieldable() {
            actions.push(Action::Yield);
        }
        actions
    }

    /// Applies `action`. The action must be one of `available_actions`.
    pub fn perform(&mut self, graph: &mut Graph, space: &TypeSearchSpace, action: &Action) -> Result<Undo> {
        assert!(self.yielded.is_none(), "builder already yielded");
        assert!(self.steps < space.max_steps(), "step budget exhausted");
        let previous_state = self.state;
        let state = space.state(self.state);
        let mut popped = SmallVec::new();
        let mut added = None;

        match action {
            Action::Push(id) => {
                assert!(graph.contains(*id), "pushed node {:?} is not in the graph", id);
                let next = state.push_target(graph.type_of(*id));
                let Some(next) = next else { panic!("no push transition for {:?}", graph.type_of(*id)); };
                self.stack.push(*id);
                self.state = next;
            }
            Action::Apply(function) => {
                let Some(next) = state.apply_target(function) else { panic!("no apply transition for {:?}", function); };
                let first = self.stack.len() - function.arity();
                popped.extend(self.stack.drain(first..));
                let id = match graph.intern(Node::function(*function, &popped)) {
                    Ok(id) => id,
                    Err(err) => {
                        self.stack.extend(popped.iter().copied());
                        return Err(err);
                    }
                };
                if !graph.contains(id) {
                    graph.push_id(id)?;
                    added = Some(id);
                }
                self.stack.push(id);
                self.state = next;
            }
            Action::Yield => {
                assert!(state.is_yieldable(), "yield is not legal here");
                let Some(top) = self.stack.pop() else { panic!("yield on an empty stack"); };
                popped.push(top);
                let id = graph.intern(Node::Yield(top))?;
                if !graph.contains(id) {
                    graph.push_id(id)?;
                    added = Some(id);
                }
                self.yielded = Some(id);
            }
        }
        self.steps += 1;
        trace!("perform {:?} -> stack {:?}", action, self.stack);
        Ok(Undo {
            action: action.clone(),
            previous_state,
            popped,
            added,
        })
    }

    /// Reverts the effect of the matching `perform`. Undos must be applied in
    /// reverse order.
    pub fn undo(&mut self, graph: &mut Graph, undo: Undo) {
        if let Some(id) = undo.added {
            let popped = graph.pop_node();
            assert_eq!(popped, Some(id), "graph changed since {:?}", undo.action);
        }
        match undo.action {
            Action::Push(_) | Action::Apply(_) => {
                self.stack.pop();
            }
            Action::Yield => self.yielded = None,
        }
        self.stack.extend(undo.popped);
        self.state = undo.previous_state;
        self.steps -= 1;
    }
}

/// Every distinct Yield node reachable from a fresh builder, in discovery
/// order. The graph is left as it was found; the yields stay in the arena.
pub fn enumerate_completions(graph: &mut Graph, space: &TypeSearchSpace) -> Result<Vec<NodeId>> {
    fn visit(
        builder: &mut BuilderState,
        graph: &mut Graph,
        space: &TypeSearchSpace,
        seen: &mut FxHashSet<NodeId>,
        out: &mut Vec<NodeId>,
    ) -> Result<()> {
        for action in builder.available_actions(graph, space) {
            let undo = builder.perform(graph, space, &action)?;
            match builder.yielded() {
                Some(id) => {
                    if seen.insert(id) {
                        out.push(id);
                    }
                }
                None => visit(builder, graph, space, seen, out)?,
            }
            builder.undo(graph, undo);
        }
        Ok(())
    }

    let mut builder = BuilderState::new(space);
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    visit(&mut builder, graph, space, &mut seen, &mut out)?;
    Ok(out)
}
