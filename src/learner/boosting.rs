//! Boosting driver: each round fits a weak learner to the current signal and
//! folds it into the ensemble with a vote. Multi-class problems keep one
//! ensemble output per class label and vote with vectors.

use super::config::BoostingConfig;
use super::edge::{CorrelationEdge, DiscreteEdge, EdgeCalculator, MultiLabelEdge};
use super::objective::{self, Objective, ObjectiveKind};
use super::policy::Policy;
use super::weak::{ScoredCandidate, WeakLearner};
use super::weights::WeightVector;
use crate::arena::{Graph, Node, NodeId};
use crate::cache::Split;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::model::{Model, Vote};
use crate::problem::{Example, Problem, Supervision};
use crate::samples::Value;
use crate::search_space::TypeSearchSpace;
use crate::types::Type;
use log::{debug, info, log, Level};
use std::fmt;

/// Edges this close to zero carry no information.
const EDGE_EPSILON: f64 = 1e-12;

/// A degenerate split with an edge this close to 1 separates the signal.
const SEPARATION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    IterationBudget,
    /// Search produced no candidate able to split the examples.
    NoCandidate,
    ZeroEdge,
    /// The last accepted weak learner separates the training signal
    /// perfectly.
    PerfectSeparation,
    /// The last accepted weak learner made no weighted error on the examples
    /// it predicts, but left some examples missing; its vote is smoothed and
    /// later rounds would only repeat it.
    DegenerateVote,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::IterationBudget => f.write_str("iteration budget exhausted"),
            StopReason::NoCandidate => f.write_str("no candidate weak learner"),
            StopReason::ZeroEdge => f.write_str("best edge is zero"),
            StopReason::PerfectSeparation => f.write_str("perfect separation"),
            StopReason::DegenerateVote => f.write_str("degenerate vote"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedRound {
    pub iteration: usize,
    pub candidate: NodeId,
    /// Yield node added to the graph (over the stump for scalar candidates).
    pub yield_node: NodeId,
    pub condition: NodeId,
    pub threshold: Option<f64>,
    pub edge: f64,
    pub vote: Vote,
    /// Loss before this round's update.
    pub training_loss: f64,
    pub validation_loss: Option<f64>,
    /// No weighted error on the predicted examples, so the vote is smoothed.
    pub degenerate: bool,
    /// Degenerate with |edge| = 1: nothing is left to learn.
    pub perfect: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    Accepted(AcceptedRound),
    Stopped(StopReason),
}

#[derive(Debug, Clone)]
pub struct BoostingReport {
    pub rounds: Vec<AcceptedRound>,
    pub stop: StopReason,
    pub training_loss: f64,
    pub training_error: Option<f64>,
}

pub struct BoostingLearner {
    config: BoostingConfig,
    problem: Problem,
    graph: Graph,
    space: TypeSearchSpace,
    context: ExecutionContext,
    weak: WeakLearner,
    calculator: Box<dyn EdgeCalculator>,
    objective: Option<Box<dyn Objective>>,
    validation: Option<Box<dyn Objective>>,
    weights: Option<WeightVector>,
    ensemble: NodeId,
    yields: Vec<NodeId>,
    votes: Vec<Vote>,
    iteration: usize,
    weak_initialized: bool,
}

impl BoostingLearner {
    pub fn new(problem: Problem, config: BoostingConfig) -> Result<Self> {
        let mut graph = Graph::new(&problem, config.cache_budget)?;
        let space = TypeSearchSpace::new(&problem, config.max_steps)?;
        let classes = problem.labels.len();
        if config.objective == ObjectiveKind::MultiClass && classes < 2 {
            return Err(Error::TooFewClasses(classes));
        }
        let calculator: Box<dyn EdgeCalculator> = match config.objective {
            ObjectiveKind::Exponential => Box::new(DiscreteEdge::new()),
            ObjectiveKind::MultiClass => Box::new(MultiLabelEdge::new(classes)),
            _ => Box::new(CorrelationEdge::new()),
        };
        let output = match config.objective {
            ObjectiveKind::MultiClass => Type::Vector(classes as u32),
            _ => Type::Double,
        };
        let ensemble = graph.new_sum(output);
        let context = ExecutionContext::new(config.seed);
        info!(
            "boosting with {} objective: {} type states, {} graph nodes, seed {}",
            config.objective.name(),
            space.num_states(),
            graph.num_nodes(),
            context.seed()
        );
        Ok(Self {
            weak: WeakLearner::new(&config),
            context,
            config,
            problem,
            graph,
            space,
            calculator,
            objective: None,
            validation: None,
            weights: None,
            ensemble,
            yields: Vec::new(),
            votes: Vec::new(),
            iteration: 0,
            weak_initialized: false,
        })
    }

    /// Replaces the weak-learner source with trajectories sampled by `policy`.
    pub fn with_policy(mut self, policy: Box<dyn Policy>) -> Self {
        self.weak = WeakLearner::Policy(policy);
        self
    }

    pub fn set_examples(&mut self, split: Split, examples: &[Example]) -> Result<()> {
        let rows: Vec<Vec<Value>> = examples.iter().map(|e| e.inputs.clone()).collect();
        let supervision: Vec<Supervision> = examples.iter().map(|e| e.supervision).collect();
        self.graph.set_examples(split, &rows)?;
        let objective = objective::build(self.config.objective, &supervision, self.problem.labels.len())?;
        match split {
            Split::Training => {
                self.weights = objective.initial_weights();
                self.objective = Some(objective);
            }
            Split::Validation => self.validation = Some(objective),
        }
        Ok(())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn space(&self) -> &TypeSearchSpace {
        &self.space
    }

    pub fn context(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub fn ensemble(&self) -> NodeId {
        self.ensemble
    }

    pub fn yields(&self) -> &[NodeId] {
        &self.yields
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn weights(&self) -> Option<&WeightVector> {
        self.weights.as_ref()
    }

    /// Current ensemble output on `split`, row-major with one value per
    /// class label for multi-class problems.
    pub fn predictions(&mut self, split: Split) -> Vec<f64> {
        self.graph
            .compute(self.ensemble, split)
            .values()
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }

    /// Runs rounds until a stopping criterion fires or the iteration budget
    /// is spent. The ensemble built so far is kept either way.
    pub fn run(&mut self) -> Result<BoostingReport> {
        let mut rounds = Vec::new();
        let mut stop = StopReason::IterationBudget;
        let total = self.config.max_iterations;
        for i in 0..total {
            self.context.progress("boosting round", i + 1, total);
            match self.round()? {
                RoundOutcome::Accepted(round) => {
                    let (degenerate, perfect) = (round.degenerate, round.perfect);
                    rounds.push(round);
                    if perfect {
                        stop = StopReason::PerfectSeparation;
                        break;
                    }
                    if degenerate {
                        stop = StopReason::DegenerateVote;
                        break;
                    }
                }
                RoundOutcome::Stopped(reason) => {
                    stop = reason;
                    break;
                }
            }
        }
        let predictions = self.predictions(Split::Training);
        let objective = self.objective.as_ref().ok_or(Error::NoExamples)?;
        let (training_loss, _) = objective.compute_residuals(&predictions);
        let training_error = objective.error_rate(&predictions);
        info!(
            "boosting stopped after {} weak learners: {} (training loss {:.6})",
            rounds.len(),
            stop,
            training_loss
        );
        Ok(BoostingReport {
            rounds,
            stop,
            training_loss,
            training_error,
        })
    }

    /// One boosting round.
    pub fn round(&mut self) -> Result<RoundOutcome> {
        if self.objective.is_none() || self.graph.num_examples(Split::Training) == 0 {
            return Err(Error::NoExamples);
        }
        if !self.weak_initialized {
            self.weak.initialize(&mut self.graph, &self.space)?;
            self.weak_initialized = true;
        }
        self.graph.invalidate_scores();

        let predictions = self.predictions(Split::Training);
        let Some(objective) = self.objective.as_ref() else { return Err(Error::NoExamples); };
        let (training_loss, residuals) = objective.compute_residuals(&predictions);
        let signal = match (&self.weights, objective.labels()) {
            (Some(weights), Some(labels)) => weights.signal(labels),
            _ => residuals,
        };
        self.calculator.initialize(&signal);

        let best = self.weak.find(
            &mut self.graph,
            &self.space,
            self.calculator.as_mut(),
            &signal,
            &self.config,
            &mut self.context,
        )?;
        let Some(best) = best else {
            info!("round {}: stopping, {}", self.iteration, StopReason::NoCandidate);
            return Ok(RoundOutcome::Stopped(StopReason::NoCandidate));
        };
        if best.edge.abs() <= EDGE_EPSILON {
            info!("round {}: stopping, {}", self.iteration, StopReason::ZeroEdge);
            return Ok(RoundOutcome::Stopped(StopReason::ZeroEdge));
        }

        // the calculator state belongs to the last scored candidate, reset it to the winner
        match self.graph.compute(best.condition, Split::Training).as_bools() {
            Some(predictions) => self.calculator.set_predictions(predictions),
            None => return Ok(RoundOutcome::Stopped(StopReason::NoCandidate)),
        }
        let degenerate = self.calculator.is_degenerate();
        let perfect = degenerate && best.edge.abs() >= 1.0 - SEPARATION_TOLERANCE;
        let mut vote = self.calculator.vote();
        if self.weights.is_none() {
            vote = vote.scaled(self.config.learning_rate);
        }
        if !vote.is_usable() {
            info!("round {}: stopping, {}", self.iteration, StopReason::ZeroEdge);
            return Ok(RoundOutcome::Stopped(StopReason::ZeroEdge));
        }
        if degenerate && !perfect {
            self.context.warning(&format!(
                "round {}: {} makes no error but leaves examples missing, its vote is smoothed",
                self.iteration,
                self.graph.name(best.condition)
            ));
        }

        let yield_node = self.accept(&best, &vote)?;
        let validation_loss = self.validation_loss();
        let round = AcceptedRound {
            iteration: self.iteration,
            candidate: best.candidate,
            yield_node,
            condition: best.condition,
            threshold: best.threshold,
            edge: best.edge,
            vote,
            training_loss,
            validation_loss,
            degenerate,
            perfect,
        };
        self.log_round(&round);
        self.iteration += 1;
        let evicted = self.graph.evict();
        if evicted > 0 {
            debug!("evicted {} node caches", evicted);
        }
        Ok(RoundOutcome::Accepted(round))
    }

    /// Adds the winner to the graph and its contribution to the ensemble,
    /// then updates the example weights.
    fn accept(&mut self, best: &ScoredCandidate, vote: &Vote) -> Result<NodeId> {
        let yield_node = self.graph.intern(Node::Yield(best.condition))?;
        self.graph.ensure_in_graph(yield_node)?;
        let (success, failure, missing) = match vote {
            Vote::Scalar(v) => (
                self.graph.constant(Type::Double, Value::Scalar(*v))?,
                self.graph.constant(Type::Double, Value::Scalar(-*v))?,
                self.graph.constant(Type::Double, Value::Scalar(0.0))?,
            ),
            Vote::Labels(values) => {
                let negated: Vec<f64> = values.iter().map(|v| -v).collect();
                (
                    self.graph.vector_constant(values)?,
                    self.graph.vector_constant(&negated)?,
                    self.graph.vector_constant(&vec![0.0; values.len()])?,
                )
            }
        };
        let contribution = self.graph.intern(Node::Test {
            condition: best.condition,
            success,
            failure,
            missing,
        })?;
        self.graph.add_sum_term(self.ensemble, contribution)?;
        self.yields.push(yield_node);
        self.votes.push(vote.clone());

        if let (Some(weights), Some(labels)) = (
            self.weights.as_mut(),
            self.objective.as_ref().and_then(|o| o.labels()),
        ) {
            let contributions = match self.graph.compute(contribution, Split::Training).values() {
                Some(values) => values.to_vec(),
                None => vec![0.0; labels.len()],
            };
            let normalizer = weights.update(labels, &contributions);
            debug!("weight normalizer {:.6}", normalizer);
        }
        self.weak.accepted(&mut self.graph, &self.space, best.candidate)?;
        Ok(yield_node)
    }

    fn validation_loss(&mut self) -> Option<f64> {
        if self.validation.is_none() || self.graph.num_examples(Split::Validation) == 0 {
            return None;
        }
        let predictions = self.predictions(Split::Validation);
        let validation = self.validation.as_ref()?;
        let (loss, _) = validation.compute_residuals(&predictions);
        if let Some(error) = validation.error_rate(&predictions) {
            debug!("validation error rate {:.4}", error);
        }
        Some(loss)
    }

    fn log_round(&self, round: &AcceptedRound) {
        let level = if self.config.verbose { Level::Info } else { Level::Debug };
        log!(
            level,
            "round {}: {} edge {:.6} vote {} training loss {:.6}{}",
            round.iteration,
            self.graph.name(round.yield_node),
            round.edge,
            round.vote,
            round.training_loss,
            match round.validation_loss {
                Some(loss) => format!(" validation loss {:.6}", loss),
                None => String::new(),
            }
        );
    }

    /// The trained model: accepted weak learners and their votes.
    pub fn model(&self) -> Result<Model> {
        Model::from_graph(
            &self.graph,
            &self.problem.inputs,
            &self.problem.labels,
            &self.yields,
            &self.votes,
        )
    }
}
