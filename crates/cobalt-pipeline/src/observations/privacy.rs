//! Randomness for observation ids and differential-privacy noise.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Length of random observation and contribution ids.
pub const RANDOM_ID_BYTES: usize = 8;

/// Means above this are sampled as a sum of smaller Poisson draws.
const POISSON_CHUNK_MEAN: f64 = 500.0;

/// A shared, cryptographically seeded random source.
///
/// Tests inject a deterministic generator with [`SecureRandom::with_rng`].
pub struct SecureRandom {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl SecureRandom {
    /// Seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut dyn RngCore) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut **rng)
    }

    pub fn random_id(&self) -> Vec<u8> {
        let mut id = vec![0u8; RANDOM_ID_BYTES];
        self.with(|rng| rng.fill_bytes(&mut id));
        id
    }

    /// Uniform in `[0, 1)`.
    pub fn uniform(&self) -> f64 {
        self.with(|rng| rng.gen_range(0.0..1.0))
    }

    /// Uniform in `[0, upper)`. `upper` must be non-zero.
    pub fn index_below(&self, upper: u64) -> u64 {
        self.with(|rng| rng.gen_range(0..upper))
    }

    /// Sample a Poisson-distributed count.
    pub fn poisson(&self, mean: f64) -> u64 {
        if !(mean > 0.0) {
            return 0;
        }
        let mut remaining = mean;
        let mut total = 0;
        while remaining > 0.0 {
            let chunk = remaining.min(POISSON_CHUNK_MEAN);
            total += self.poisson_small(chunk);
            remaining -= chunk;
        }
        total
    }

    /// Knuth's multiplication method, exact for small means.
    fn poisson_small(&self, mean: f64) -> u64 {
        let limit = (-mean).exp();
        let mut product = 1.0;
        let mut count = 0;
        self.with(|rng| loop {
            product *= rng.gen_range(0.0..1.0);
            if product <= limit {
                return count;
            }
            count += 1;
        })
    }
}
