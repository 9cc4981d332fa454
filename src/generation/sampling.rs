//! Random state for training and sampling.
//!
//! Supports both deterministic (seeded) and non-deterministic draws.
//! Create a [`SamplingContext`] with an optional seed for reproducible outputs
//! and thread it through every call that needs randomness.

use anyhow::Result;
use candle_core::{Device, Shape, Tensor};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

/// RNG state for a single training step or generation session.
///
/// Encapsulates all randomness so that multiple sessions can run
/// concurrently without interfering with each other. Reseeding a context
/// only affects draws made through that context.
///
/// # Determinism
///
/// When created with a seed, the same seed produces identical output
/// across runs and threads. Without a seed, the initial state comes from
/// system entropy.
pub struct SamplingContext {
    rng: ChaCha8Rng,
    seed: Option<u64>,
}

impl SamplingContext {
    /// Create a new sampling context with an optional seed.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::seed_from_u64(rand::random()),
        };
        Self { rng, seed }
    }

    /// Reset the RNG to the state produced by `seed`.
    pub fn reset(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.seed = Some(seed);
    }

    /// The most recent seed, if the context has ever been seeded.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Uniform f32 in [0, 1).
    pub fn uniform(&mut self) -> f32 {
        self.rng.random::<f32>()
    }

    /// Uniform f32 in `[low, high)`. A degenerate range returns `low`.
    pub fn uniform_range(&mut self, low: f32, high: f32) -> f32 {
        if high <= low {
            return low;
        }
        low + (high - low) * self.uniform()
    }

    /// `true` with probability `p`.
    pub fn bernoulli(&mut self, p: f64) -> bool {
        (self.uniform() as f64) < p
    }

    /// Uniform integer in `[0, max]` (inclusive).
    pub fn index_inclusive(&mut self, max: usize) -> usize {
        self.rng.random_range(0..=max)
    }

    /// `n` uniform draws in `[low, high)`, one per example.
    pub fn uniform_vec(&mut self, n: usize, low: f32, high: f32) -> Vec<f32> {
        (0..n).map(|_| self.uniform_range(low, high)).collect()
    }

    /// Standard-normal tensor of the given shape (F32).
    pub fn randn<S: Into<Shape>>(&mut self, shape: S, device: &Device) -> Result<Tensor> {
        let shape: Shape = shape.into();
        let data: Vec<f32> = (0..shape.elem_count())
            .map(|_| StandardNormal.sample(&mut self.rng))
            .collect();
        Ok(Tensor::from_vec(data, shape, device)?)
    }
}

impl std::fmt::Debug for SamplingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingContext")
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_range() {
        let mut ctx = SamplingContext::new(None);
        for _ in 0..100 {
            let r = ctx.uniform();
            assert!(r >= 0.0);
            assert!(r < 1.0);
        }
    }

    #[test]
    fn test_uniform_range_bounds() {
        let mut ctx = SamplingContext::new(Some(7));
        for _ in 0..100 {
            let r = ctx.uniform_range(0.7, 1.0);
            assert!((0.7..=1.0).contains(&r));
        }
        assert!((ctx.uniform_range(1.0, 1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_range_excludes_high() {
        let mut ctx = SamplingContext::new(Some(3));
        for r in ctx.uniform_vec(1000, 0.0, 0.5) {
            assert!((0.0..0.5).contains(&r), "r = {r}");
        }
    }

    #[test]
    fn test_bernoulli_extremes() {
        let mut ctx = SamplingContext::new(Some(1));
        for _ in 0..50 {
            assert!(!ctx.bernoulli(0.0));
            assert!(ctx.bernoulli(1.0));
        }
    }

    #[test]
    fn test_index_inclusive() {
        let mut ctx = SamplingContext::new(Some(3));
        assert_eq!(ctx.index_inclusive(0), 0);
        for _ in 0..100 {
            assert!(ctx.index_inclusive(5) <= 5);
        }
    }

    #[test]
    fn test_seeded_deterministic() {
        let mut ctx1 = SamplingContext::new(Some(12345));
        let values1: Vec<f32> = (0..10).map(|_| ctx1.uniform()).collect();

        let mut ctx2 = SamplingContext::new(Some(12345));
        let values2: Vec<f32> = (0..10).map(|_| ctx2.uniform()).collect();

        assert_eq!(values1, values2, "Seeded values should be identical");
    }

    #[test]
    fn test_different_seeds_different_values() {
        let mut ctx1 = SamplingContext::new(Some(12345));
        let values1: Vec<f32> = (0..10).map(|_| ctx1.uniform()).collect();

        let mut ctx2 = SamplingContext::new(Some(67890));
        let values2: Vec<f32> = (0..10).map(|_| ctx2.uniform()).collect();

        let same_count = values1
            .iter()
            .zip(values2.iter())
            .filter(|(a, b)| (*a - *b).abs() < 1e-9)
            .count();
        assert!(
            same_count < 10,
            "Different seeds should produce different values"
        );
    }

    #[test]
    fn test_reset() {
        let mut ctx = SamplingContext::new(Some(42));
        let first = ctx.uniform();
        let _second = ctx.uniform();

        ctx.reset(42);
        assert_eq!(ctx.uniform(), first);
        assert_eq!(ctx.seed(), Some(42));
    }

    #[test]
    fn test_randn_shape_and_stats() {
        let device = Device::Cpu;
        let mut ctx = SamplingContext::new(Some(0));
        let noise = ctx.randn((4, 256, 8), &device).unwrap();
        assert_eq!(noise.dims(), &[4, 256, 8]);

        let values: Vec<f32> = noise.flatten_all().unwrap().to_vec1().unwrap();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 0.1, "mean {mean}");
        assert!((var - 1.0).abs() < 0.1, "var {var}");
    }

    #[test]
    fn test_randn_reset_repeats() {
        let device = Device::Cpu;
        let mut ctx = SamplingContext::new(None);
        ctx.reset(9);
        let a: Vec<f32> = ctx.randn(6, &device).unwrap().to_vec1().unwrap();
        ctx.reset(9);
        let b: Vec<f32> = ctx.randn(6, &device).unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
    }
}
