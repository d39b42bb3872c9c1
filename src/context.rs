use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Services the learner is handed rather than reaching for globals: the
/// random source and progress reporting.
pub struct ExecutionContext {
    rng: StdRng,
    seed: u64,
}

impl ExecutionContext {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform index in `0..n`. `n` must be positive.
    pub fn random_index(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    pub fn random_fraction(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    pub fn progress(&self, stage: &str, done: usize, total: usize) {
        debug!("{} {}/{}", stage, done, total);
    }

    pub fn warning(&self, message: &str) {
        warn!("{}", message);
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(0)
    }
}
