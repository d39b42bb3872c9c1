//! Bandit pool of candidate completions.
//!
//! Each arm is one Yield node with its play statistics. Rounds spend a budget
//! of plays on the arm with the highest index score, `(reward_sum + c) /
//! played`, unplayed arms first; the round's weak learner is then read off
//! the arm with the best mean reward. Arms survive across boosting rounds,
//! which amortizes the search. Completions that cannot split the training
//! examples never get an arm.

use super::weak::is_splittable;
use crate::arena::{Graph, Node, NodeId};
use crate::builder::enumerate_completions;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::search_space::TypeSearchSpace;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, PartialEq)]
pub struct Arm {
    candidate: Option<NodeId>,
    played: usize,
    reward_sum: f64,
}

impl Arm {
    fn new(candidate: NodeId) -> Self {
        Self {
            candidate: Some(candidate),
            played: 0,
            reward_sum: 0.0,
        }
    }

    /// `None` once the arm is destroyed.
    pub fn candidate(&self) -> Option<NodeId> {
        self.candidate
    }

    pub fn played(&self) -> usize {
        self.played
    }

    pub fn reward_sum(&self) -> f64 {
        self.reward_sum
    }

    pub fn mean_reward(&self) -> f64 {
        if self.played == 0 {
            0.0
        } else {
            self.reward_sum / self.played as f64
        }
    }

    pub fn index_score(&self, exploration_bonus: f64) -> f64 {
        if self.played == 0 {
            f64::INFINITY
        } else {
            (self.reward_sum + exploration_bonus) / self.played as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Ranked {
    score: f64,
    arm: usize,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    // max-heap on score, older arms first on ties
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then_with(|| other.arm.cmp(&self.arm))
    }
}

pub struct BanditPool {
    arms: Vec<Arm>,
    free: Vec<usize>,
    lookup: FxHashMap<NodeId, usize>,
    retired: FxHashSet<NodeId>,
    queue: BinaryHeap<Ranked>,
    exploration_bonus: f64,
}

impl BanditPool {
    pub fn new(exploration_bonus: f64) -> Self {
        Self {
            arms: Vec::new(),
            free: Vec::new(),
            lookup: FxHashMap::default(),
            retired: FxHashSet::default(),
            queue: BinaryHeap::new(),
            exploration_bonus,
        }
    }

    pub fn num_arms(&self) -> usize {
        self.lookup.len()
    }

    pub fn arm(&self, index: usize) -> &Arm {
        &self.arms[index]
    }

    pub fn arms(&self) -> impl Iterator<Item = &Arm> {
        self.arms.iter().filter(|a| a.candidate.is_some())
    }

    pub fn contains(&self, candidate: NodeId) -> bool {
        self.lookup.contains_key(&candidate)
    }

    /// Creates arms for every splittable completion of the current graph not
    /// already tracked, accepted, or retired. Unsplittable completions are
    /// retired. Returns the number of new arms.
    pub fn initialize(&mut self, graph: &mut Graph, space: &TypeSearchSpace) -> Result<usize> {
        let completions = enumerate_completions(graph, space)?;
        let mut fresh = Vec::with_capacity(completions.len());
        for candidate in completions {
            if graph.contains(candidate) || self.lookup.contains_key(&candidate) || self.retired.contains(&candidate) {
                continue;
            }
            if is_splittable(graph, candidate) {
                fresh.push(candidate);
            } else {
                debug!("no arm for {}: it cannot split the training examples", graph.name(candidate));
                self.retired.insert(candidate);
            }
        }
        let added = self.add_arms(&fresh);
        debug!("bandit pool: {} new arms, {} total", added, self.num_arms());
        Ok(added)
    }

    /// Adds one arm per candidate not yet seen, then rebuilds the priority
    /// queue.
    pub fn add_arms(&mut self, candidates: &[NodeId]) -> usize {
        let mut added = 0;
        for &candidate in candidates {
            if self.lookup.contains_key(&candidate) || self.retired.contains(&candidate) {
                continue;
            }
            let index = match self.free.pop() {
                Some(slot) => {
                    self.arms[slot] = Arm::new(candidate);
                    slot
                }
                None => {
                    self.arms.push(Arm::new(candidate));
                    self.arms.len() - 1
                }
            };
            self.lookup.insert(candidate, index);
            added += 1;
        }
        self.rebuild_queue();
        added
    }

    fn destroy_arm(&mut self, index: usize) {
        if let Some(candidate) = self.arms[index].candidate.take() {
            self.lookup.remove(&candidate);
            self.free.push(index);
        }
    }

    /// Destroys the arm of `candidate`, if any, and keeps it from coming
    /// back.
    pub fn retire(&mut self, candidate: NodeId) {
        if let Some(index) = self.lookup.get(&candidate).copied() {
            self.destroy_arm(index);
        }
        self.retired.insert(candidate);
    }

    /// Retires the arm of an accepted candidate and derives the arms the
    /// grown graph makes reachable. Boolean candidates are never re-created;
    /// scalar ones come back with fresh statistics since another threshold
    /// may still help.
    pub fn execute_arm(&mut self, graph: &mut Graph, space: &TypeSearchSpace, candidate: NodeId) -> Result<usize> {
        if let Some(index) = self.lookup.get(&candidate).copied() {
            self.destroy_arm(index);
        }
        let boolean = match graph.node(candidate) {
            Node::Yield(arg) => graph.type_of(*arg).is_bool(),
            _ => true,
        };
        if boolean {
            self.retired.insert(candidate);
        }
        self.initialize(graph, space)
    }

    fn rebuild_queue(&mut self) {
        let bonus = self.exploration_bonus;
        self.queue = self
            .arms
            .iter()
            .enumerate()
            .filter(|(_, arm)| arm.candidate.is_some())
            .map(|(arm, a)| Ranked {
                score: a.index_score(bonus),
                arm,
            })
            .collect();
    }

    /// Plays the arm with the highest index score and reinserts it with its
    /// new score. Returns the played arm index, or `None` on an empty pool.
    pub fn play_arm_with_highest_index(
        &mut self,
        mut reward: impl FnMut(NodeId) -> Result<f64>,
    ) -> Result<Option<usize>> {
        while let Some(top) = self.queue.pop() {
            let Some(candidate) = self.arms[top.arm].candidate else { continue; };
            let r = reward(candidate)?;
            let arm = &mut self.arms[top.arm];
            arm.played += 1;
            arm.reward_sum += r;
            let score = arm.index_score(self.exploration_bonus);
            self.queue.push(Ranked { score, arm: top.arm });
            return Ok(Some(top.arm));
        }
        Ok(None)
    }

    /// Played arm with the best mean reward, uniformly at random among ties.
    pub fn sample_arm_with_highest_reward(&self, context: &mut ExecutionContext) -> Option<NodeId> {
        let mut best = f64::NEG_INFINITY;
        let mut ties = Vec::new();
        for arm in self.arms() {
            if arm.played == 0 {
                continue;
            }
            let mean = arm.mean_reward();
            if mean > best {
                best = mean;
                ties.clear();
            }
            if mean == best {
                ties.extend(arm.candidate);
            }
        }
        match ties.len() {
            0 => None,
            1 => Some(ties[0]),
            n => Some(ties[context.random_index(n)]),
        }
    }

    /// The `k` played arms with the best mean reward: (candidate, mean, plays).
    pub fn top_arms(&self, k: usize) -> Vec<(NodeId, f64, usize)> {
        let mut played: Vec<(NodeId, f64, usize)> = self
            .arms()
            .filter(|a| a.played > 0)
            .filter_map(|a| a.candidate.map(|c| (c, a.mean_reward(), a.played)))
            .collect();
        played.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        played.truncate(k);
        played
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Split;
    use crate::problem::Problem;
    use crate::samples::Value;
    use crate::types::Type;

    fn pool(n: u32) -> BanditPool {
        let mut pool = BanditPool::new(1.0);
        let candidates: Vec<NodeId> = (0..n).map(NodeId).collect();
        assert_eq!(pool.add_arms(&candidates), n as usize);
        pool
    }

    #[test]
    fn test_every_arm_is_tried_first() {
        let mut pool = pool(3);
        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(pool.play_arm_with_highest_index(|_| Ok(1.0)).unwrap().unwrap());
        }
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(pool.arms().all(|a| a.played() == 1));
    }

    #[test]
    fn test_index_prefers_rewarding_arms() {
        let mut pool = pool(2);
        let reward = |c: NodeId| Ok(if c == NodeId(1) { 0.9 } else { 0.1 });
        for _ in 0..10 {
            pool.play_arm_with_highest_index(reward).unwrap();
        }
        assert!(pool.arm(1).played() > pool.arm(0).played());
        let mut context = ExecutionContext::new(0);
        assert_eq!(pool.sample_arm_with_highest_reward(&mut context), Some(NodeId(1)));
        let top = pool.top_arms(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, NodeId(1));
        assert!((top[0].1 - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_destroyed_slots_are_reused() {
        let mut pool = pool(2);
        pool.destroy_arm(0);
        pool.rebuild_queue();
        assert_eq!(pool.num_arms(), 1);
        assert_eq!(pool.add_arms(&[NodeId(1), NodeId(7)]), 1);
        assert_eq!(pool.arm(0).candidate(), Some(NodeId(7)));
        assert_eq!(pool.arms.len(), 2);
    }

    #[test]
    fn test_retired_candidates_are_not_recreated() {
        let mut pool = pool(1);
        pool.retired.insert(NodeId(5));
        assert_eq!(pool.add_arms(&[NodeId(5)]), 0);
        assert!(!pool.contains(NodeId(5)));
    }

    #[test]
    fn test_equal_means_are_sampled_uniformly() {
        let mut pool = pool(2);
        for _ in 0..4 {
            pool.play_arm_with_highest_index(|_| Ok(0.5)).unwrap();
        }
        assert_eq!(pool.arm(0).mean_reward(), pool.arm(1).mean_reward());
        let picks: FxHashSet<NodeId> = (0..16)
            .filter_map(|seed| pool.sample_arm_with_highest_reward(&mut ExecutionContext::new(seed)))
            .collect();
        assert_eq!(picks.len(), 2);
    }

    #[test]
    fn test_retired_arm_is_not_sampled() {
        let mut pool = pool(2);
        let reward = |c: NodeId| Ok(if c == NodeId(1) { 0.9 } else { 0.1 });
        for _ in 0..4 {
            pool.play_arm_with_highest_index(reward).unwrap();
        }
        pool.retire(NodeId(1));
        assert_eq!(pool.sample_arm_with_highest_reward(&mut ExecutionContext::new(0)), Some(NodeId(0)));
        assert_eq!(pool.add_arms(&[NodeId(1)]), 0);
        assert_eq!(pool.num_arms(), 1);
    }

    #[test]
    fn test_unsplittable_completions_get_no_arm() {
        let p = Problem::new()
            .with_input("x", Type::Double)
            .with_constant(Type::Double, Value::Scalar(1.0));
        let mut g = Graph::new(&p, usize::MAX).unwrap();
        let rows: Vec<Vec<Value>> = [1.0, -1.0, 2.0].iter().map(|x| vec![Value::Scalar(*x)]).collect();
        g.set_examples(Split::Training, &rows).unwrap();
        let space = TypeSearchSpace::new(&p, 2).unwrap();
        let mut pool = BanditPool::new(1.0);
        assert_eq!(pool.initialize(&mut g, &space).unwrap(), 1);
        let names: Vec<&str> = pool.arms().filter_map(|a| a.candidate()).map(|c| g.name(c)).collect();
        assert_eq!(names, vec!["yield x"]);
        // retired, so a second pass adds nothing
        assert_eq!(pool.initialize(&mut g, &space).unwrap(), 0);
    }

    #[test]
    fn test_sampling_without_plays() {
        let pool = pool(2);
        assert_eq!(pool.sample_arm_with_highest_reward(&mut ExecutionContext::new(1)), None);
        assert!(pool.top_arms(3).is_empty());
    }
}
