pub mod bandit;
pub mod boosting;
pub mod config;
pub mod edge;
pub mod objective;
pub mod policy;
pub mod weak;
pub mod weights;

pub use bandit::{Arm, BanditPool};
pub use boosting::{AcceptedRound, BoostingLearner, BoostingReport, RoundOutcome, StopReason};
pub use config::{BanditConfig, BoostingConfig, PolicyConfig, WeakLearnerKind};
pub use edge::{find_best_threshold, CorrelationEdge, DiscreteEdge, EdgeCalculator, MultiLabelEdge};
pub use objective::{Objective, ObjectiveKind};
pub use policy::{Policy, RandomPolicy};
pub use weak::{ScoredCandidate, WeakLearner};
pub use weights::WeightVector;
