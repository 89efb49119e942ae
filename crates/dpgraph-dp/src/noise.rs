//! Gaussian mechanism: calibration and sampling.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};

use dpgraph_core::dtype::DType;
use dpgraph_core::tensor::Tensor;

use crate::error::{PublishError, Result};

/// Epsilon spent by a subject whose sources move the output by at most
/// `l2_width` (before Lipschitz scaling) when noise of multiplier `sigma` is
/// added: `sqrt(2 ln(1.25 / delta)) * l2_width / sigma`.
pub fn gaussian_epsilon(delta: f64, l2_width: f64, sigma: f64) -> f64 {
    (2.0 * (1.25 / delta).ln()).sqrt() * l2_width / sigma
}

pub struct GaussianNoise {
    rng: ChaCha20Rng,
}

impl GaussianNoise {
    /// Deterministic when `seed` is set, otherwise seeded from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Self { rng }
    }

    /// `value + N(0, scale^2)` element-wise, as float64.
    pub fn add_to(&mut self, value: &Tensor, scale: f64) -> Result<Tensor> {
        let normal = Normal::new(0.0, scale).map_err(|_| PublishError::InvalidSigma(scale))?;
        let rng = &mut self.rng;
        let noised: Vec<f64> = value
            .data()
            .iter()
            .map(|v| v + normal.sample(rng))
            .collect();
        Ok(Tensor::with_dtype(
            value.shape().clone(),
            DType::Float64,
            noised,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_noise_is_reproducible() {
        let v = Tensor::zeros([1000], DType::Float64);
        let a = GaussianNoise::new(Some(7)).add_to(&v, 2.0).unwrap();
        let b = GaussianNoise::new(Some(7)).add_to(&v, 2.0).unwrap();
        assert_eq!(a, b);
        let mean = a.sum_all() / 1000.0;
        let var = a.data().iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 999.0;
        assert!(mean.abs() < 0.3);
        assert!((var.sqrt() - 2.0).abs() < 0.3);
    }

    #[test]
    fn zero_scale_is_identity_and_negative_is_rejected() {
        let v = Tensor::new([2], vec![1.0, 2.0]).unwrap();
        let mut noise = GaussianNoise::new(Some(1));
        assert_eq!(noise.add_to(&v, 0.0).unwrap().data(), v.data());
        assert!(matches!(noise.add_to(&v, -1.0), Err(PublishError::InvalidSigma(_))));
    }

    #[test]
    fn epsilon_scales_with_width_over_sigma() {
        let e1 = gaussian_epsilon(1e-5, 1.0, 1.0);
        let e2 = gaussian_epsilon(1e-5, 2.0, 4.0);
        assert!((e1 - 2.0 * e2).abs() < 1e-12);
        assert!((e1 - (2.0 * 125_000f64.ln()).sqrt()).abs() < 1e-12);
    }
}
