//! Distributions for simulated on-scene work durations.

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Samples how long a unit works on scene before the incident is closed.
pub trait WorkDuration: Send + Sync + std::fmt::Debug {
    fn sample(&self) -> Duration;
}

/// Uniform over `[min_ms, max_ms]`.
#[derive(Debug)]
pub struct UniformWorkDuration {
    min_ms: u64,
    max_ms: u64,
    rng: Mutex<StdRng>,
}

impl UniformWorkDuration {
    /// Bounds are swapped if given in the wrong order. `seed` makes the
    /// sequence reproducible; `None` seeds from entropy.
    pub fn new(min_ms: u64, max_ms: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
            rng: Mutex::new(rng),
        }
    }
}

impl WorkDuration for UniformWorkDuration {
    fn sample(&self) -> Duration {
        let ms = self.rng.lock().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Always the same duration; useful for deterministic runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedWorkDuration(pub Duration);

impl WorkDuration for FixedWorkDuration {
    fn sample(&self) -> Duration {
        self.0
    }
}
