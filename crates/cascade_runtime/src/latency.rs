//! Injected processing latency.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Processing delays in milliseconds, sampled uniformly.
///
/// Heavily weighted toward zero with a long tail, so most hops are cheap and a
/// few are slow.
const DEFAULT_SAMPLES_MS: &[u64] = &[
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, //
    2, 2, 2, 2, 2, 2, 2, 2, 2, //
    3, 3, 3, 3, 3, //
    4, 4, 4, 5, 5, 5, 6, 6, 6, //
    7, 7, 8, 8, 9, 9, 10, 11, 11, 12, 13, 15, 16, 18, 20, 22, 25, 29, 33, 39, 45, 52, 62, 70, 78,
    87, 97, 111, 126, 143, 164, 188, 220, 254, 289, 331, 379, 546,
];

/// Discrete distribution of processing delays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyModel {
    samples_ms: Vec<u64>,
}

impl LatencyModel {
    /// Build a model from explicit samples; an empty list means no delay
    #[must_use]
    pub fn from_samples(samples_ms: Vec<u64>) -> Self {
        Self { samples_ms }
    }

    /// Model that never delays
    #[must_use]
    pub fn zero() -> Self {
        Self::from_samples(Vec::new())
    }

    /// Underlying samples in milliseconds
    #[must_use]
    pub fn samples_ms(&self) -> &[u64] {
        &self.samples_ms
    }

    /// Draw one delay
    #[must_use]
    pub fn sample(&self) -> Duration {
        let ms = self
            .samples_ms
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

impl Default for LatencyModel {
    fn default() -> Self {
        Self::from_samples(DEFAULT_SAMPLES_MS.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_distribution_shape() {
        let model = LatencyModel::default();
        let samples = model.samples_ms();
        assert_eq!(samples.len(), 99);
        assert_eq!(samples.iter().filter(|&&s| s == 0).count(), 21);
        assert_eq!(samples.iter().filter(|&&s| s == 1).count(), 17);
        assert_eq!(samples.iter().copied().max(), Some(546));
        assert!(samples.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_sample_is_drawn_from_model() {
        let model = LatencyModel::from_samples(vec![3, 7]);
        for _ in 0..100 {
            let d = model.sample();
            assert!(d == Duration::from_millis(3) || d == Duration::from_millis(7));
        }
    }

    #[test]
    fn test_zero_model() {
        assert_eq!(LatencyModel::zero().sample(), Duration::ZERO);
    }
}
