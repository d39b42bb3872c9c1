//! Loss objectives: each turns the current ensemble predictions into a loss
//! value and a per-example signal (pseudo-residual) weak learners are fit to.
//! Multi-class objectives work on n x K values laid out row-major.

use super::weights::WeightVector;
use crate::error::{Error, Result};
use crate::problem::Supervision;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveKind {
    SquaredError,
    /// AdaBoost's exponential margin loss.
    Exponential,
    PairwiseRanking,
    /// AdaBoost.MH's exponential loss over one binary problem per class.
    MultiClass,
}

impl ObjectiveKind {
    pub fn name(self) -> &'static str {
        match self {
            ObjectiveKind::SquaredError => "squared error",
            ObjectiveKind::Exponential => "exponential",
            ObjectiveKind::PairwiseRanking => "pairwise ranking",
            ObjectiveKind::MultiClass => "multi-class exponential",
        }
    }

    /// Whether boosting keeps explicit example weights for this objective.
    pub fn is_weighted(self) -> bool {
        matches!(self, ObjectiveKind::Exponential | ObjectiveKind::MultiClass)
    }
}

pub trait Objective {
    fn name(&self) -> &'static str;

    fn len(&self) -> usize;

    /// Values per example in predictions and signals.
    fn outputs(&self) -> usize {
        1
    }

    /// Loss value and per-example signal for the current predictions.
    fn compute_residuals(&self, predictions: &[f64]) -> (f64, Vec<f64>);

    /// Fraction of misclassified examples (or misordered pairs), when the
    /// objective has such a notion.
    fn error_rate(&self, _predictions: &[f64]) -> Option<f64> {
        None
    }

    /// Labels in {-1, +1} for objectives that have them.
    fn labels(&self) -> Option<&[f64]> {
        None
    }

    /// Starting example weights of weighted objectives.
    fn initial_weights(&self) -> Option<WeightVector> {
        None
    }
}

/// Builds the objective of `kind` for the supervision of a set of examples.
/// `classes` is the label count of multi-class problems.
pub fn build(kind: ObjectiveKind, supervision: &[Supervision], classes: usize) -> Result<Box<dyn Objective>> {
    Ok(match kind {
        ObjectiveKind::SquaredError => Box::new(SquaredError::new(supervision)?),
        ObjectiveKind::Exponential => Box::new(Exponential::new(supervision)?),
        ObjectiveKind::PairwiseRanking => Box::new(PairwiseRanking::new(supervision)?),
        ObjectiveKind::MultiClass => Box::new(MultiClass::new(supervision, classes)?),
    })
}

fn sign(x: f64) -> f64 {
    if x >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

fn sign_error_rate(labels: &[f64], predictions: &[f64]) -> Option<f64> {
    if labels.is_empty() {
        return None;
    }
    let errors = labels.iter().zip(predictions).filter(|(y, f)| sign(**f) != **y).count();
    Some(errors as f64 / labels.len() as f64)
}

/// Least squares on real targets; binary targets become -1 / +1.
pub struct SquaredError {
    targets: Vec<f64>,
    labels: Option<Vec<f64>>,
}

impl SquaredError {
    pub fn new(supervision: &[Supervision]) -> Result<Self> {
        let mut binary = true;
        let targets = supervision
            .iter()
            .enumerate()
            .map(|(index, s)| match s {
                Supervision::Binary(b) => Ok(if *b { 1.0 } else { -1.0 }),
                Supervision::Regression(y) => {
                    binary = false;
                    Ok(*y)
                }
                Supervision::Ranked { .. } | Supervision::Class(_) => Err(Error::SupervisionMismatch {
                    index,
                    reason: "squared error needs a binary or real target".to_string(),
                }),
            })
            .collect::<Result<Vec<f64>>>()?;
        let labels = binary.then(|| targets.clone());
        Ok(Self { targets, labels })
    }
}

impl Objective for SquaredError {
    fn name(&self) -> &'static str {
        "squared error"
    }

    fn len(&self) -> usize {
        self.targets.len()
    }

    fn compute_residuals(&self, predictions: &[f64]) -> (f64, Vec<f64>) {
        let residuals: Vec<f64> = self.targets.iter().zip(predictions).map(|(y, f)| y - f).collect();
        let n = residuals.len().max(1) as f64;
        let loss = residuals.iter().map(|r| r * r).sum::<f64>() / n;
        (loss, residuals)
    }

    fn error_rate(&self, predictions: &[f64]) -> Option<f64> {
        sign_error_rate(self.labels.as_ref()?, predictions)
    }

    fn labels(&self) -> Option<&[f64]> {
        self.labels.as_deref()
    }
}

/// Mean of exp(-y F). The signal is y exp(-y F), normalized to unit mass,
/// which is AdaBoost's signed example weight.
pub struct Exponential {
    labels: Vec<f64>,
}

impl Exponential {
    pub fn new(supervision: &[Supervision]) -> Result<Self> {
        let labels = supervision
            .iter()
            .enumerate()
            .map(|(index, s)| match s {
                Supervision::Binary(b) => Ok(if *b { 1.0 } else { -1.0 }),
                _ => Err(Error::SupervisionMismatch {
                    index,
                    reason: "exponential loss needs a binary label".to_string(),
                }),
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(Self { labels })
    }
}

impl Objective for Exponential {
    fn name(&self) -> &'static str {
        "exponential"
    }

    fn len(&self) -> usize {
        self.labels.len()
    }

    fn compute_residuals(&self, predictions: &[f64]) -> (f64, Vec<f64>) {
        let margins: Vec<f64> = self.labels.iter().zip(predictions).map(|(y, f)| (-y * f).exp()).collect();
        let total: f64 = margins.iter().sum();
        let n = margins.len().max(1) as f64;
        let signal = if total > 0.0 {
            margins.iter().zip(&self.labels).map(|(m, y)| y * m / total).collect()
        } else {
            vec![0.0; margins.len()]
        };
        (total / n, signal)
    }

    fn error_rate(&self, predictions: &[f64]) -> Option<f64> {
        sign_error_rate(&self.labels, predictions)
    }

    fn labels(&self) -> Option<&[f64]> {
        Some(&self.labels)
    }

    fn initial_weights(&self) -> Option<WeightVector> {
        Some(WeightVector::uniform(self.labels.len()))
    }
}

/// AdaBoost.MH: each example is K binary problems "is of class j", with
/// y_ij = +1 for its class and -1 for the others. The loss is
/// sum_ij w0_ij exp(-y_ij F_ij) under the prior weights w0, which give the
/// true class of each example half of its mass.
pub struct MultiClass {
    classes: usize,
    targets: Vec<u32>,
    /// y_ij, row-major
    labels: Vec<f64>,
    prior: Vec<f64>,
}

impl MultiClass {
    pub fn new(supervision: &[Supervision], classes: usize) -> Result<Self> {
        if classes < 2 {
            return Err(Error::TooFewClasses(classes));
        }
        let targets = supervision
            .iter()
            .enumerate()
            .map(|(index, s)| match s {
                Supervision::Class(c) if (*c as usize) < classes => Ok(*c),
                Supervision::Class(c) => Err(Error::SupervisionMismatch {
                    index,
                    reason: format!("class {} out of {} labels", c, classes),
                }),
                _ => Err(Error::SupervisionMismatch {
                    index,
                    reason: "multi-class loss needs a class label".to_string(),
                }),
            })
            .collect::<Result<Vec<u32>>>()?;
        let n = targets.len().max(1) as f64;
        let positive = 1.0 / (2.0 * n);
        let negative = 1.0 / (2.0 * n * (classes - 1) as f64);
        let mut labels = Vec::with_capacity(targets.len() * classes);
        let mut prior = Vec::with_capacity(targets.len() * classes);
        for &target in &targets {
            for j in 0..classes as u32 {
                let own = j == target;
                labels.push(if own { 1.0 } else { -1.0 });
                prior.push(if own { positive } else { negative });
            }
        }
        Ok(Self {
            classes,
            targets,
            labels,
            prior,
        })
    }

    pub fn classes(&self) -> usize {
        self.classes
    }
}

/// Index of the largest value, the first one on ties.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

impl Objective for MultiClass {
    fn name(&self) -> &'static str {
        "multi-class exponential"
    }

    fn len(&self) -> usize {
        self.targets.len()
    }

    fn outputs(&self) -> usize {
        self.classes
    }

    fn compute_residuals(&self, predictions: &[f64]) -> (f64, Vec<f64>) {
        let masses: Vec<f64> = self
            .labels
            .iter()
            .zip(&self.prior)
            .zip(predictions)
            .map(|((y, w), f)| w * (-y * f).exp())
            .collect();
        let total: f64 = masses.iter().sum();
        let signal = if total > 0.0 {
            masses.iter().zip(&self.labels).map(|(m, y)| y * m / total).collect()
        } else {
            vec![0.0; masses.len()]
        };
        (total, signal)
    }

    fn error_rate(&self, predictions: &[f64]) -> Option<f64> {
        if self.targets.is_empty() {
            return None;
        }
        let errors = predictions
            .chunks(self.classes)
            .zip(&self.targets)
            .filter(|(row, target)| argmax(row) != **target as usize)
            .count();
        Some(errors as f64 / self.targets.len() as f64)
    }

    fn labels(&self) -> Option<&[f64]> {
        Some(&self.labels)
    }

    fn initial_weights(&self) -> Option<WeightVector> {
        Some(WeightVector::new(self.prior.clone()))
    }
}

/// Logistic loss over ordered pairs of alternatives within a group; the
/// alternative with the lower cost should get the higher score.
pub struct PairwiseRanking {
    n: usize,
    /// (better, worse) example indices
    pairs: Vec<(usize, usize)>,
}

impl PairwiseRanking {
    pub fn new(supervision: &[Supervision]) -> Result<Self> {
        let mut groups: FxHashMap<u32, Vec<(usize, f64)>> = FxHashMap::default();
        for (index, s) in supervision.iter().enumerate() {
            match s {
                Supervision::Ranked { group, cost } => groups.entry(*group).or_default().push((index, *cost)),
                _ => {
                    return Err(Error::SupervisionMismatch {
                        index,
                        reason: "ranking loss needs a group and a cost".to_string(),
                    })
                }
            }
        }
        let mut keys: Vec<u32> = groups.keys().copied().collect();
        keys.sort_unstable();
        let mut pairs = Vec::new();
        for key in keys {
            let alternatives = &groups[&key];
            for &(i, ci) in alternatives {
                for &(j, cj) in alternatives {
                    if ci < cj {
                        pairs.push((i, j));
                    }
                }
            }
        }
        Ok(Self {
            n: supervision.len(),
            pairs,
        })
    }

    pub fn num_pairs(&self) -> usize {
        self.pairs.len()
    }
}

impl Objective for PairwiseRanking {
    fn name(&self) -> &'static str {
        "pairwise ranking"
    }

    fn len(&self) -> usize {
        self.n
    }

    fn compute_residuals(&self, predictions: &[f64]) -> (f64, Vec<f64>) {
        let mut signal = vec![0.0; self.n];
        if self.pairs.is_empty() {
            return (0.0, signal);
        }
        let mut loss = 0.0;
        let scale = 1.0 / self.pairs.len() as f64;
        for &(better, worse) in &self.pairs {
            let margin = predictions[better] - predictions[worse];
            loss += (-margin).exp().ln_1p();
            // negative gradient of log(1 + exp(-margin))
            let g = 1.0 / (1.0 + margin.exp());
            signal[better] += g * scale;
            signal[worse] -= g * scale;
        }
        (loss * scale, signal)
    }

    fn error_rate(&self, predictions: &[f64]) -> Option<f64> {
        if self.pairs.is_empty() {
            return None;
        }
        let wrong = self
            .pairs
            .iter()
            .filter(|(better, worse)| predictions[*better] <= predictions[*worse])
            .count();
        Some(wrong as f64 / self.pairs.len() as f64)
    }
}
