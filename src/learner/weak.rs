//! Weak-learner search: where candidate completions come from and how each
//! one is scored against the round's signal.

use super::bandit::BanditPool;
use super::config::{BoostingConfig, WeakLearnerKind};
use super::edge::{find_best_threshold, stump_predictions, CorrelationEdge, EdgeCalculator, MultiLabelEdge};
use super::policy::{Policy, RandomPolicy};
use crate::arena::{Graph, Node, NodeId};
use crate::builder::{enumerate_completions, BuilderState};
use crate::cache::Split;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::functions::Function;
use crate::samples::{RAW_FALSE, RAW_TRUE};
use crate::search_space::TypeSearchSpace;
use log::debug;

/// A candidate with its best split on the current signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    /// Yield node as produced by search.
    pub candidate: NodeId,
    /// Boolean node splitting the examples: the yielded node itself, or a
    /// stump over it for scalar candidates.
    pub condition: NodeId,
    pub threshold: Option<f64>,
    pub edge: f64,
}

/// Scores a Yield node. Boolean candidates are scored directly; scalar ones
/// through the exact threshold search. `None` when the candidate cannot split
/// the training examples.
pub fn score_candidate(
    graph: &mut Graph,
    calculator: &mut dyn EdgeCalculator,
    candidate: NodeId,
) -> Result<Option<ScoredCandidate>> {
    let Node::Yield(arg) = *graph.node(candidate) else { return Ok(None); };
    let ty = graph.type_of(arg);
    if ty.is_bool() {
        let Some(predictions) = graph.compute(arg, Split::Training).as_bools() else { return Ok(None); };
        calculator.set_predictions(predictions);
        let edge = calculator.compute_edge();
        return Ok(Some(ScoredCandidate {
            candidate,
            condition: arg,
            threshold: None,
            edge,
        }));
    }
    if !ty.is_scalar() {
        return Ok(None);
    }
    let Some(sorted) = graph.sorted_values(arg) else { return Ok(None); };
    let n = graph.num_examples(Split::Training);
    let Some((threshold, edge)) = find_best_threshold(calculator, &sorted, n) else { return Ok(None); };
    let condition = graph.intern(Node::function(Function::Stump { threshold }, &[arg]))?;
    Ok(Some(ScoredCandidate {
        candidate,
        condition,
        threshold: Some(threshold),
        edge,
    }))
}

/// Whether a Yield node can split the training examples at all: a boolean
/// candidate must take both values, a scalar one two distinct values.
pub fn is_splittable(graph: &mut Graph, candidate: NodeId) -> bool {
    let Node::Yield(arg) = *graph.node(candidate) else { return false; };
    let ty = graph.type_of(arg);
    if ty.is_bool() {
        return match graph.compute(arg, Split::Training).as_bools() {
            Some(values) => values.contains(&RAW_TRUE) && values.contains(&RAW_FALSE),
            None => false,
        };
    }
    match graph.sorted_values(arg) {
        Some(sorted) => match (sorted.first(), sorted.last()) {
            (Some(low), Some(high)) => high.1 > low.1,
            _ => false,
        },
        None => false,
    }
}

/// Reward of playing a bandit arm: the examples are split at random into a
/// fitting part and a held-out part (`validation_fraction` of them); one
/// mean of the normalized signal is fit per branch on the fitting part, and
/// the reward is 1 minus the squared error of those means on the held-out
/// part. Multi-class signals hold one value per label and example; means and
/// errors are then taken per label.
pub fn held_out_reward(
    graph: &mut Graph,
    candidate: NodeId,
    signal: &[f64],
    validation_fraction: f64,
    context: &mut ExecutionContext,
) -> Result<f64> {
    let Node::Yield(arg) = *graph.node(candidate) else { return Ok(0.0); };
    let n = graph.num_examples(Split::Training);
    if n == 0 || signal.len() % n != 0 {
        return Ok(0.0);
    }
    let outputs = signal.len() / n;
    let rms = (signal.iter().map(|s| s * s).sum::<f64>() / signal.len().max(1) as f64).sqrt();
    if rms == 0.0 {
        return Ok(0.0);
    }
    let scaled: Vec<f64> = signal.iter().map(|s| s / rms).collect();
    let held_out: Vec<bool> = (0..n).map(|_| context.random_fraction() < validation_fraction).collect();

    let ty = graph.type_of(arg);
    let predictions: Vec<u8> = if ty.is_bool() {
        match graph.compute(arg, Split::Training).as_bools() {
            Some(b) => b.to_vec(),
            None => return Ok(0.0),
        }
    } else if ty.is_scalar() {
        let Some(sorted) = graph.sorted_values(arg) else { return Ok(0.0); };
        let fitting: Vec<(u32, f64)> = sorted.iter().filter(|(i, _)| !held_out[*i as usize]).copied().collect();
        let masked: Vec<f64> = scaled
            .iter()
            .enumerate()
            .map(|(k, s)| if held_out[k / outputs] { 0.0 } else { *s })
            .collect();
        let mut calculator: Box<dyn EdgeCalculator> = if outputs > 1 {
            Box::new(MultiLabelEdge::new(outputs))
        } else {
            Box::new(CorrelationEdge::new())
        };
        calculator.initialize(&masked);
        let Some((threshold, _)) = find_best_threshold(calculator.as_mut(), &fitting, n) else { return Ok(0.0); };
        match graph.compute(arg, Split::Training).as_scalars() {
            Some(values) => stump_predictions(values, threshold),
            None => return Ok(0.0),
        }
    } else {
        return Ok(0.0);
    };

    // per branch (false, true, missing) and label
    let mut sums = vec![0.0; 3 * outputs];
    let mut counts = [0usize; 3];
    for i in (0..n).filter(|i| !held_out[*i]) {
        let branch = predictions[i] as usize;
        for j in 0..outputs {
            sums[branch * outputs + j] += scaled[i * outputs + j];
        }
        counts[branch] += 1;
    }
    let means: Vec<f64> = sums
        .iter()
        .enumerate()
        .map(|(k, s)| match counts[k / outputs] {
            0 => 0.0,
            c => s / c as f64,
        })
        .collect();

    // with nothing held out, fall back to the fitting error
    let any_held_out = held_out.iter().any(|h| *h);
    let mut error = 0.0;
    let mut count = 0usize;
    for i in (0..n).filter(|i| held_out[*i] || !any_held_out) {
        let branch = predictions[i] as usize;
        for j in 0..outputs {
            let d = scaled[i * outputs + j] - means[branch * outputs + j];
            error += d * d;
        }
        count += outputs;
    }
    Ok(1.0 - error / count.max(1) as f64)
}

fn better(best: &Option<ScoredCandidate>, scored: &ScoredCandidate) -> bool {
    best.as_ref().map_or(true, |b| scored.edge.abs() > b.edge.abs())
}

/// Source of candidate completions.
pub enum WeakLearner {
    Exhaustive,
    Bandit(BanditPool),
    Policy(Box<dyn Policy>),
}

impl WeakLearner {
    pub fn new(config: &BoostingConfig) -> Self {
        match config.weak_learner {
            WeakLearnerKind::Exhaustive => WeakLearner::Exhaustive,
            WeakLearnerKind::Bandit => WeakLearner::Bandit(BanditPool::new(config.bandit.exploration_bonus)),
            WeakLearnerKind::Policy => WeakLearner::Policy(Box::new(RandomPolicy::new())),
        }
    }

    pub fn initialize(&mut self, graph: &mut Graph, space: &TypeSearchSpace) -> Result<()> {
        if let WeakLearner::Bandit(pool) = self {
            pool.initialize(graph, space)?;
        }
        Ok(())
    }

    /// Best candidate of the round for the signal `calculator` was
    /// initialized with.
    pub fn find(
        &mut self,
        graph: &mut Graph,
        space: &TypeSearchSpace,
        calculator: &mut dyn EdgeCalculator,
        signal: &[f64],
        config: &BoostingConfig,
        context: &mut ExecutionContext,
    ) -> Result<Option<ScoredCandidate>> {
        match self {
            WeakLearner::Exhaustive => {
                let completions = enumerate_completions(graph, space)?;
                let mut best = None;
                for candidate in &completions {
                    if let Some(scored) = score_candidate(graph, calculator, *candidate)? {
                        graph.set_score(*candidate, scored.edge.abs());
                        if better(&best, &scored) {
                            best = Some(scored);
                        }
                    }
                }
                debug!("scored {} completions", completions.len());
                Ok(best)
            }
            WeakLearner::Bandit(pool) => {
                let fraction = config.bandit.validation_fraction;
                for _ in 0..config.bandit.budget_per_round {
                    let played = pool.play_arm_with_highest_index(|candidate| {
                        held_out_reward(graph, candidate, signal, fraction, context)
                    })?;
                    if played.is_none() {
                        break;
                    }
                }
                for (candidate, mean, played) in pool.top_arms(5) {
                    debug!("arm {}: mean reward {:.4} over {} plays", graph.name(candidate), mean, played);
                }
                while let Some(candidate) = pool.sample_arm_with_highest_reward(context) {
                    if let Some(scored) = score_candidate(graph, calculator, candidate)? {
                        return Ok(Some(scored));
                    }
                    context.warning(&format!(
                        "retiring arm {}: it cannot split the training examples",
                        graph.name(candidate)
                    ));
                    pool.retire(candidate);
                }
                Ok(None)
            }
            WeakLearner::Policy(policy) => {
                let mut best = None;
                for _ in 0..config.policy.episodes_per_round {
                    let (_, scored) = run_episode(policy.as_mut(), graph, space, calculator, context)?;
                    if let Some(scored) = scored {
                        if better(&best, &scored) {
                            best = Some(scored);
                        }
                    }
                }
                Ok(best)
            }
        }
    }

    /// Called once the candidate was folded into the ensemble.
    pub fn accepted(&mut self, graph: &mut Graph, space: &TypeSearchSpace, candidate: NodeId) -> Result<()> {
        if let WeakLearner::Bandit(pool) = self {
            pool.execute_arm(graph, space, candidate)?;
        }
        Ok(())
    }
}

/// Builds one trajectory with `policy`. The reward is the |edge| of the
/// yielded candidate, 0 for an aborted trajectory. A candidate already
/// scored this round is rewarded from its memoized score and not returned
/// again. The graph is restored afterwards.
fn run_episode(
    policy: &mut dyn Policy,
    graph: &mut Graph,
    space: &TypeSearchSpace,
    calculator: &mut dyn EdgeCalculator,
    context: &mut ExecutionContext,
) -> Result<(f64, Option<ScoredCandidate>)> {
    let mut builder = BuilderState::new(space);
    let mut undos = Vec::new();
    let mut actions = builder.available_actions(graph, space);
    if actions.is_empty() {
        return Ok((0.0, None));
    }
    let mut action = policy.start(&builder, &actions, context);
    let mut scored = None;
    let mut memoized = None;
    loop {
        undos.push(builder.perform(graph, space, &action)?);
        if let Some(candidate) = builder.yielded() {
            memoized = graph.score(candidate);
            if memoized.is_none() {
                scored = score_candidate(graph, calculator, candidate)?;
                if let Some(s) = &scored {
                    graph.set_score(candidate, s.edge.abs());
                }
            }
            break;
        }
        actions = builder.available_actions(graph, space);
        if actions.is_empty() {
            break;
        }
        action = policy.step(0.0, &builder, &actions, context);
    }
    let reward = memoized.or_else(|| scored.as_ref().map(|s| s.edge.abs())).unwrap_or(0.0);
    policy.end(reward, &builder);
    while let Some(undo) = undos.pop() {
        builder.undo(graph, undo);
    }
    Ok((reward, scored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::edge::DiscreteEdge;
    use crate::problem::Problem;
    use crate::samples::Value;
    use crate::types::Type;

    fn graph() -> Graph {
        let p = Problem::new().with_input("x", Type::Double).with_input("b", Type::Bool);
        let mut g = Graph::new(&p, usize::MAX).unwrap();
        let rows: Vec<Vec<Value>> = [(1.0, true), (-1.0, false), (2.0, false), (-2.0, false)]
            .iter()
            .map(|(x, b)| vec![Value::Scalar(*x), Value::Bool(*b)])
            .collect();
        g.set_examples(Split::Training, &rows).unwrap();
        g
    }

    #[test]
    fn test_score_scalar_candidate_builds_stump() {
        let mut g = graph();
        let x = g.input_node(0).unwrap();
        let candidate = g.intern(Node::Yield(x)).unwrap();
        let mut c = DiscreteEdge::new();
        c.initialize(&[0.25, -0.25, 0.25, -0.25]);
        let scored = score_candidate(&mut g, &mut c, candidate).unwrap().unwrap();
        assert_eq!(scored.threshold, Some(0.0));
        assert!((scored.edge - 1.0).abs() < 1e-12);
        assert_eq!(g.name(scored.condition), "(x >= 0)");
    }

    #[test]
    fn test_score_boolean_candidate() {
        let mut g = graph();
        let b = g.input_node(1).unwrap();
        let candidate = g.intern(Node::Yield(b)).unwrap();
        let mut c = DiscreteEdge::new();
        c.initialize(&[0.25, -0.25, 0.25, -0.25]);
        let scored = score_candidate(&mut g, &mut c, candidate).unwrap().unwrap();
        assert_eq!(scored.condition, b);
        assert_eq!(scored.threshold, None);
        assert!((scored.edge - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_splittable_candidates() {
        let mut g = graph();
        let x = g.input_node(0).unwrap();
        let b = g.input_node(1).unwrap();
        let one = g.constant(Type::Double, Value::Scalar(1.0)).unwrap();
        let always = g.constant(Type::Bool, Value::Bool(true)).unwrap();
        for (node, expected) in [(x, true), (b, true), (one, false), (always, false)] {
            let candidate = g.intern(Node::Yield(node)).unwrap();
            assert_eq!(is_splittable(&mut g, candidate), expected, "{}", g.name(candidate));
        }
        assert!(!is_splittable(&mut g, x));
    }

    #[test]
    fn test_episode_reward_reads_memoized_score() {
        let p = Problem::new().with_input("x", Type::Double);
        let mut g = Graph::new(&p, usize::MAX).unwrap();
        let rows: Vec<Vec<Value>> = [1.0, -1.0].iter().map(|x| vec![Value::Scalar(*x)]).collect();
        g.set_examples(Split::Training, &rows).unwrap();
        let space = TypeSearchSpace::new(&p, 2).unwrap();
        let mut c = DiscreteEdge::new();
        c.initialize(&[0.5, -0.5]);
        let mut policy = RandomPolicy::new();
        let mut context = ExecutionContext::new(0);

        let (reward, scored) = run_episode(&mut policy, &mut g, &space, &mut c, &mut context).unwrap();
        let scored = scored.unwrap();
        assert!((reward - 1.0).abs() < 1e-12);
        assert_eq!(g.score(scored.candidate), Some(reward));
        assert_eq!(g.num_nodes(), 1);

        // the only completion is memoized now
        let (again, none) = run_episode(&mut policy, &mut g, &space, &mut c, &mut context).unwrap();
        assert_eq!(again, reward);
        assert!(none.is_none());
        g.invalidate_scores();
        assert!(run_episode(&mut policy, &mut g, &space, &mut c, &mut context).unwrap().1.is_some());
    }

    #[test]
    fn test_held_out_reward_on_label_signal() {
        let mut g = graph();
        let x = g.input_node(0).unwrap();
        let good = g.intern(Node::Yield(x)).unwrap();
        // two labels; x >= 0 splits classes 0 (rows 0, 2) and 1 (rows 1, 3)
        let w = 0.125;
        let signal = [w, -w, -w, w, w, -w, -w, w];
        let mut context = ExecutionContext::new(1);
        let reward = held_out_reward(&mut g, good, &signal, 0.0, &mut context).unwrap();
        assert!((reward - 1.0).abs() < 1e-12);
        // a signal that does not fit the example count earns nothing
        assert_eq!(held_out_reward(&mut g, good, &signal[..5], 0.0, &mut context).unwrap(), 0.0);
    }

    #[test]
    fn test_held_out_reward_ranks_informative_candidates() {
        let mut g = graph();
        let x = g.input_node(0).unwrap();
        let b = g.input_node(1).unwrap();
        let good = g.intern(Node::Yield(x)).unwrap();
        let weak = g.intern(Node::Yield(b)).unwrap();
        let signal = [0.25, -0.25, 0.25, -0.25];
        let mut context = ExecutionContext::new(3);
        // nothing held out: rewards are the fitting errors
        let r_good = held_out_reward(&mut g, good, &signal, 0.0, &mut context).unwrap();
        let r_weak = held_out_reward(&mut g, weak, &signal, 0.0, &mut context).unwrap();
        assert!((r_good - 1.0).abs() < 1e-12);
        assert!(r_weak < r_good);
    }
}
