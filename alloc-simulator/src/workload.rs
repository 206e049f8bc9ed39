// Synthetic request generator

use crate::models::{Request, WorkloadConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces a deterministic stream of get-or-set requests
///
/// A fixed share of the traffic goes to a small set of popular keys; the rest
/// is spread uniformly over the long tail. Each key keeps one size for the
/// whole run so that overwrites are like-for-like.
#[derive(Debug)]
pub struct WorkloadGenerator {
    config: WorkloadConfig,
    rng: StdRng,
    emitted: usize,
}

impl WorkloadGenerator {
    pub fn new(config: WorkloadConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            emitted: 0,
        }
    }

    fn popular_keys(&self) -> u64 {
        (self.config.keys * u64::from(self.config.popular_keys_percent) / 100).max(1)
    }

    /// Size assigned to `key`, stable across the run
    pub fn size_of(&self, key: u64) -> u32 {
        let span = u64::from(self.config.max_size.saturating_sub(self.config.min_size)) + 1;
        // multiplicative hash keeps sizes spread but reproducible
        let mixed = key.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 17;
        self.config.min_size + (mixed % span) as u32
    }
}

impl Iterator for WorkloadGenerator {
    type Item = Request;

    fn next(&mut self) -> Option<Request> {
        if self.emitted >= self.config.requests {
            return None;
        }

        let popular = self.popular_keys();
        let key = if self.rng.gen_range(0..100u8) < self.config.popular_traffic_percent {
            self.rng.gen_range(0..popular)
        } else {
            self.rng.gen_range(0..self.config.keys.max(1))
        };
        let time = self.emitted as u64 / u64::from(self.config.rps.max(1));
        self.emitted += 1;

        Some(Request {
            time,
            key,
            size: self.size_of(key),
        })
    }
}
