use crate::error::Result;
use crate::learner::objective::ObjectiveKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where each round's candidate completions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeakLearnerKind {
    /// Score every completion of the search space.
    Exhaustive,
    /// Spend a play budget on the bandit pool, then take its best arm.
    Bandit,
    /// Sample trajectories with a policy.
    Policy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    pub budget_per_round: usize,
    pub exploration_bonus: f64,
    // Probability that an example is held out when an arm is played.
    pub validation_fraction: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            budget_per_round: 100,
            exploration_bonus: 1.0,
            validation_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub episodes_per_round: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { episodes_per_round: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub max_iterations: usize,
    // Actions per program, yield included.
    pub max_steps: usize,
    // Shrinkage of real-valued votes; AdaBoost votes are not shrunk.
    pub learning_rate: f64,
    pub objective: ObjectiveKind,
    pub weak_learner: WeakLearnerKind,
    pub bandit: BanditConfig,
    pub policy: PolicyConfig,
    pub cache_budget: usize,
    pub seed: u64,
    pub verbose: bool,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_steps: 4,
            learning_rate: 0.1,
            objective: ObjectiveKind::Exponential,
            weak_learner: WeakLearnerKind::Exhaustive,
            bandit: BanditConfig::default(),
            policy: PolicyConfig::default(),
            cache_budget: 256 * 1024 * 1024,
            seed: 0,
            verbose: false,
        }
    }
}

impl BoostingConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BoostingConfig::from_json(r#"{"max_iterations": 3, "bandit": {"budget_per_round": 7}}"#).unwrap();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.bandit.budget_per_round, 7);
        assert_eq!(config.bandit.validation_fraction, 0.5);
        assert_eq!(config.max_steps, 4);
        assert_eq!(config.weak_learner, WeakLearnerKind::Exhaustive);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(BoostingConfig::from_json("{\"max_steps\": \"four\"}").is_err());
    }
}
