use crate::builder::{Action, BuilderState};
use crate::context::ExecutionContext;

/// Chooses builder actions along one trajectory. `start` picks the first
/// action, `step` each following one with the reward of the previous step,
/// and `end` receives the reward of the finished trajectory.
pub trait Policy {
    fn start(&mut self, state: &BuilderState, actions: &[Action], context: &mut ExecutionContext) -> Action;

    fn step(
        &mut self,
        reward: f64,
        state: &BuilderState,
        actions: &[Action],
        context: &mut ExecutionContext,
    ) -> Action;

    fn end(&mut self, reward: f64, state: &BuilderState);
}

/// Uniformly random choices.
#[derive(Debug, Default)]
pub struct RandomPolicy;

impl RandomPolicy {
    pub fn new() -> Self {
        RandomPolicy
    }
}

impl Policy for RandomPolicy {
    fn start(&mut self, _state: &BuilderState, actions: &[Action], context: &mut ExecutionContext) -> Action {
        actions[context.random_index(actions.len())].clone()
    }

    fn step(
        &mut self,
        _reward: f64,
        state: &BuilderState,
        actions: &[Action],
        context: &mut ExecutionContext,
    ) -> Action {
        self.start(state, actions, context)
    }

    fn end(&mut self, _reward: f64, _state: &BuilderState) {}
}
