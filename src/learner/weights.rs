/// AdaBoost example weights. Non-negative and summing to one between
/// updates.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightVector {
    weights: Vec<f64>,
}

impl WeightVector {
    /// Normalized copy of non-negative `weights`.
    pub fn new(mut weights: Vec<f64>) -> Self {
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            weights.iter_mut().for_each(|w| *w /= total);
        }
        Self { weights }
    }

    pub fn uniform(n: usize) -> Self {
        Self {
            weights: vec![1.0 / n.max(1) as f64; n],
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Signed weights y w, the signal edge calculators consume.
    pub fn signal(&self, labels: &[f64]) -> Vec<f64> {
        self.weights.iter().zip(labels).map(|(w, y)| w * y).collect()
    }

    /// Multiplies each weight by exp(-y f), where f is the vote the example
    /// received (+vote, -vote, or 0 when its test was missing), then
    /// renormalizes. Returns the sum before normalization.
    pub fn update(&mut self, labels: &[f64], contributions: &[f64]) -> f64 {
        for ((w, y), f) in self.weights.iter_mut().zip(labels).zip(contributions) {
            let f = if f.is_nan() { 0.0 } else { *f };
            *w *= (-y * f).exp();
        }
        let total = self.sum();
        if total > 0.0 && total.is_finite() {
            for w in self.weights.iter_mut() {
                *w /= total;
            }
        }
        total
    }
}
