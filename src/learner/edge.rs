//! Edge calculators and the exact stump threshold search.
//!
//! An edge calculator holds per-example predictions h in {+1, -1, 0 (missing)}
//! against a per-example signal s and keeps running sums, so flipping one
//! prediction is O(1). The edge is a normalized correlation between s and h:
//! its magnitude is what weak-learner search maximizes, its sign says which
//! branch earns the positive vote. The multi-label calculator keeps one
//! such correlation per class label and votes with a vector.

use crate::model::Vote;
use crate::samples::{RAW_FALSE, RAW_MISSING, RAW_TRUE};

pub trait EdgeCalculator {
    /// Resets the calculator for a new signal. Every prediction starts missing.
    fn initialize(&mut self, signal: &[f64]);

    /// Sets every prediction from raw booleans (0 false, 1 true, 2 missing).
    fn set_predictions(&mut self, predictions: &[u8]);

    /// Toggles example `index` between true and false.
    fn flip_prediction(&mut self, index: usize);

    fn compute_edge(&self) -> f64;

    /// Vote of the success branch; the failure branch gets its opposite.
    fn compute_vote(&self) -> f64;

    /// Number of values in a vote, one per class label for multi-label
    /// calculators.
    fn outputs(&self) -> usize {
        1
    }

    fn vote(&self) -> Vote {
        Vote::Scalar(self.compute_vote())
    }

    /// The current split separates the signal perfectly, so the vote is
    /// unbounded and boosting cannot make further progress.
    fn is_degenerate(&self) -> bool {
        false
    }

    fn predictions(&self) -> &[u8];
}

fn direction(raw: u8) -> f64 {
    match raw {
        RAW_TRUE => 1.0,
        RAW_FALSE => -1.0,
        _ => 0.0,
    }
}

/// AdaBoost's edge over signed example weights s = y w:
/// edge = sum(s h) / sum(|s|), vote = ln(correct / error) / 2.
#[derive(Debug, Clone, Default)]
pub struct DiscreteEdge {
    signal: Vec<f64>,
    predictions: Vec<u8>,
    total: f64,
    correct: f64,
    error: f64,
}

impl DiscreteEdge {
    pub fn new() -> Self {
        Self::default()
    }

    fn account(&mut self, index: usize, sign: f64) {
        let agreement = self.signal[index] * direction(self.predictions[index]);
        if agreement > 0.0 {
            self.correct += sign * agreement;
        } else {
            self.error -= sign * agreement;
        }
    }
}

impl EdgeCalculator for DiscreteEdge {
    fn initialize(&mut self, signal: &[f64]) {
        self.signal = signal.to_vec();
        self.predictions = vec![RAW_MISSING; signal.len()];
        self.total = signal.iter().map(|s| s.abs()).sum();
        self.correct = 0.0;
        self.error = 0.0;
    }

    fn set_predictions(&mut self, predictions: &[u8]) {
        debug_assert_eq!(predictions.len(), self.signal.len());
        self.predictions.copy_from_slice(predictions);
        self.correct = 0.0;
        self.error = 0.0;
        for i in 0..self.signal.len() {
            self.account(i, 1.0);
        }
    }

    fn flip_prediction(&mut self, index: usize) {
        self.account(index, -1.0);
        self.predictions[index] = match self.predictions[index] {
            RAW_TRUE => RAW_FALSE,
            RAW_FALSE => RAW_TRUE,
            other => other,
        };
        self.account(index, 1.0);
    }

    fn compute_edge(&self) -> f64 {
        if self.total > 0.0 {
            (self.correct - self.error) / self.total
        } else {
            0.0
        }
    }

    fn compute_vote(&self) -> f64 {
        if self.is_degenerate() {
            // smoothed, so a perfect split still gets a finite vote
            let epsilon = self.total / self.signal.len().max(1) as f64;
            0.5 * ((self.correct + epsilon) / (self.error + epsilon)).ln()
        } else {
            0.5 * (self.correct / self.error).ln()
        }
    }

    fn is_degenerate(&self) -> bool {
        let tolerance = 1e-12 * self.total;
        self.correct + self.error > tolerance && (self.error <= tolerance || self.correct <= tolerance)
    }

    fn predictions(&self) -> &[u8] {
        &self.predictions
    }
}

/// AdaBoost.MH's edge over n examples times K labels. The signal holds the
/// signed weights s_ij = y_ij w_ij row-major, with y_ij = +1 for the true
/// class and -1 otherwise. Each label picks the sign v_j that agrees with the
/// larger side, and edge = sum_j v_j sum_i s_ij h_i / sum |s|.
#[derive(Debug, Clone)]
pub struct MultiLabelEdge {
    labels: usize,
    signal: Vec<f64>,
    predictions: Vec<u8>,
    total: f64,
    /// sum_i s_ij h_i per label
    dot: Vec<f64>,
    /// sum_i |s_ij| over the non-missing predictions, per label
    mass: Vec<f64>,
}

impl MultiLabelEdge {
    pub fn new(labels: usize) -> Self {
        Self {
            labels: labels.max(1),
            signal: Vec::new(),
            predictions: Vec::new(),
            total: 0.0,
            dot: vec![0.0; labels.max(1)],
            mass: vec![0.0; labels.max(1)],
        }
    }

    fn label_vote(&self, label: usize) -> f64 {
        if self.dot[label] > 1e-9 {
            1.0
        } else {
            -1.0
        }
    }

    /// (correct, error) weights under the current label votes.
    fn split_weights(&self) -> (f64, f64) {
        let mut correct = 0.0;
        let mut error = 0.0;
        for j in 0..self.labels {
            let agreement = self.label_vote(j) * self.dot[j];
            correct += (self.mass[j] + agreement) / 2.0;
            error += (self.mass[j] - agreement) / 2.0;
        }
        (correct, error.max(0.0))
    }

    fn account(&mut self, index: usize, sign: f64) {
        let h = direction(self.predictions[index]);
        if h == 0.0 {
            return;
        }
        let row = &self.signal[index * self.labels..(index + 1) * self.labels];
        for (j, s) in row.iter().enumerate() {
            self.dot[j] += sign * s * h;
            self.mass[j] += sign * s.abs();
        }
    }
}

impl EdgeCalculator for MultiLabelEdge {
    fn initialize(&mut self, signal: &[f64]) {
        debug_assert_eq!(signal.len() % self.labels, 0);
        self.signal = signal.to_vec();
        self.predictions = vec![RAW_MISSING; signal.len() / self.labels];
        self.total = signal.iter().map(|s| s.abs()).sum();
        self.dot.iter_mut().for_each(|d| *d = 0.0);
        self.mass.iter_mut().for_each(|m| *m = 0.0);
    }

    fn set_predictions(&mut self, predictions: &[u8]) {
        debug_assert_eq!(predictions.len(), self.predictions.len());
        self.predictions.copy_from_slice(predictions);
        self.dot.iter_mut().for_each(|d| *d = 0.0);
        self.mass.iter_mut().for_each(|m| *m = 0.0);
        for i in 0..self.predictions.len() {
            self.account(i, 1.0);
        }
    }

    fn flip_prediction(&mut self, index: usize) {
        self.account(index, -1.0);
        self.predictions[index] = match self.predictions[index] {
            RAW_TRUE => RAW_FALSE,
            RAW_FALSE => RAW_TRUE,
            other => other,
        };
        self.account(index, 1.0);
    }

    fn compute_edge(&self) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        (0..self.labels).map(|j| self.label_vote(j) * self.dot[j]).sum::<f64>() / self.total
    }

    /// Magnitude of the vote vector, always smoothed.
    fn compute_vote(&self) -> f64 {
        let (correct, error) = self.split_weights();
        let examples = self.predictions.len().max(1) as f64;
        let epsilon = self.total / (2.0 * self.labels as f64 * examples);
        0.5 * ((correct + epsilon) / (error + epsilon)).ln()
    }

    fn outputs(&self) -> usize {
        self.labels
    }

    fn vote(&self) -> Vote {
        let alpha = self.compute_vote();
        Vote::Labels((0..self.labels).map(|j| alpha * self.label_vote(j)).collect())
    }

    fn is_degenerate(&self) -> bool {
        let (correct, error) = self.split_weights();
        let tolerance = 1e-12 * self.total;
        correct + error > tolerance && error <= tolerance
    }

    fn predictions(&self) -> &[u8] {
        &self.predictions
    }
}

/// Gradient boosting's edge over real residuals r:
/// edge = sum(r h) / sqrt(k sum(r^2)) with k non-missing predictions, which is
/// the cosine between r and h. The vote is the least-squares fit sum(r h) / k.
#[derive(Debug, Clone, Default)]
pub struct CorrelationEdge {
    signal: Vec<f64>,
    predictions: Vec<u8>,
    norm: f64,
    dot: f64,
    present: usize,
}

impl CorrelationEdge {
    pub fn new() -> Self {
        Self::default()
    }

    fn account(&mut self, index: usize, sign: f64) {
        let h = direction(self.predictions[index]);
        self.dot += sign * self.signal[index] * h;
        if h != 0.0 {
            if sign > 0.0 {
                self.present += 1;
            } else {
                self.present -= 1;
            }
        }
    }
}

impl EdgeCalculator for CorrelationEdge {
    fn initialize(&mut self, signal: &[f64]) {
        self.signal = signal.to_vec();
        self.predictions = vec![RAW_MISSING; signal.len()];
        self.norm = signal.iter().map(|r| r * r).sum::<f64>().sqrt();
        self.dot = 0.0;
        self.present = 0;
    }

    fn set_predictions(&mut self, predictions: &[u8]) {
        debug_assert_eq!(predictions.len(), self.signal.len());
        self.predictions.copy_from_slice(predictions);
        self.dot = 0.0;
        self.present = 0;
        for i in 0..self.signal.len() {
            self.account(i, 1.0);
        }
    }

    fn flip_prediction(&mut self, index: usize) {
        self.account(index, -1.0);
        self.predictions[index] = match self.predictions[index] {
            RAW_TRUE => RAW_FALSE,
            RAW_FALSE => RAW_TRUE,
            other => other,
        };
        self.account(index, 1.0);
    }

    fn compute_edge(&self) -> f64 {
        if self.present == 0 || self.norm == 0.0 {
            return 0.0;
        }
        (self.dot / ((self.present as f64).sqrt() * self.norm)).clamp(-1.0, 1.0)
    }

    fn compute_vote(&self) -> f64 {
        if self.present == 0 {
            0.0
        } else {
            self.dot / self.present as f64
        }
    }

    fn predictions(&self) -> &[u8] {
        &self.predictions
    }
}

/// Exact threshold search over `sorted` (example index, value) pairs sorted
/// by value. Predictions are "value >= threshold"; examples absent from
/// `sorted` are missing. Returns the threshold and edge with the largest
/// |edge|, the first boundary in increasing order winning ties, or `None` if
/// all values are equal.
pub fn find_best_threshold(calculator: &mut dyn EdgeCalculator, sorted: &[(u32, f64)], n: usize) -> Option<(f64, f64)> {
    let mut predictions = vec![RAW_MISSING; n];
    for (i, _) in sorted {
        predictions[*i as usize] = RAW_TRUE;
    }
    calculator.set_predictions(&predictions);

    let mut best: Option<(f64, f64)> = None;
    for k in 0..sorted.len() {
        calculator.flip_prediction(sorted[k].0 as usize);
        let Some(next) = sorted.get(k + 1) else { break; };
        if next.1 <= sorted[k].1 {
            continue;
        }
        let edge = calculator.compute_edge();
        if best.map_or(true, |(_, e)| edge.abs() > e.abs()) {
            best = Some((sorted[k].1 + (next.1 - sorted[k].1) / 2.0, edge));
        }
    }
    best
}

/// Raw stump predictions of `values >= threshold`.
pub fn stump_predictions(values: &[f64], threshold: f64) -> Vec<u8> {
    values
        .iter()
        .map(|x| {
            if x.is_nan() {
                RAW_MISSING
            } else if *x >= threshold {
                RAW_TRUE
            } else {
                RAW_FALSE
            }
        })
        .collect()
}
