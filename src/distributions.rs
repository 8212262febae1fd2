/*!
Density primitives and the small distributions the mixture samplers draw from.

All draws take the random source as an explicit `&mut R: Rng`, so a run seeded
once reproduces its whole trace.

# Examples

```rust
use mixture_mcmc::distributions::{normal_pdf, Categorical, IsotropicGaussian};
use rand::{rngs::SmallRng, SeedableRng};

let mut rng = SmallRng::seed_from_u64(42);

let p = normal_pdf(0.0, 0.0, 1.0);
assert!((p - 0.3989422804014327).abs() < 1e-12);

let cat = Categorical::from_log_weights(&[0.0, f64::NEG_INFINITY]).unwrap();
assert_eq!(cat.sample(&mut rng), 0);

let momentum = IsotropicGaussian::new(0.5);
let phi = momentum.sample(3, &mut rng);
println!("log density of {phi}: {}", momentum.log_prob(&phi));
```
*/

use ndarray::Array1;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use std::f64::consts::PI;

/// Density of `N(mu, sigma^2)` at `x`.
pub fn normal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    normal_log_pdf(x, mu, sigma).exp()
}

/// Log-density of `N(mu, sigma^2)` at `x`.
pub fn normal_log_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let var = sigma * sigma;
    -0.5 * (2.0 * PI * var).ln() - (x - mu).powi(2) / (2.0 * var)
}

/**
A zero-mean Gaussian with covariance `variance * I`, used for HMC momenta.

The same value is the diagonal of the mass matrix, so positions move by
`step_size * phi / variance`.
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicGaussian {
    pub variance: f64,
}

impl IsotropicGaussian {
    pub fn new(variance: f64) -> Self {
        Self { variance }
    }

    /// Draws a `dim`-dimensional vector.
    pub fn sample<R: Rng + ?Sized>(&self, dim: usize, rng: &mut R) -> Array1<f64> {
        let std = self.variance.sqrt();
        Array1::from_shape_fn(dim, |_| {
            let z: f64 = StandardNormal.sample(rng);
            z * std
        })
    }

    /// Fully normalized log-density at `x`.
    pub fn log_prob(&self, x: &Array1<f64>) -> f64 {
        let d = x.len() as f64;
        let sq = x.dot(x);
        -0.5 * d * (2.0 * PI * self.variance).ln() - 0.5 * sq / self.variance
    }

    /// Applies the inverse mass matrix: `phi / variance`.
    pub fn velocity(&self, phi: &Array1<f64>) -> Array1<f64> {
        phi / self.variance
    }
}

/**
A categorical distribution over `0..len`, built from unnormalized log weights.

Weights are shifted by their maximum before exponentiation, so rows whose raw
densities would all underflow still normalize.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    pub probs: Vec<f64>,
}

impl Categorical {
    /// Returns `None` when no weight is finite (nothing to normalize) or any is NaN.
    pub fn from_log_weights(log_weights: &[f64]) -> Option<Self> {
        if log_weights.iter().any(|w| w.is_nan()) {
            return None;
        }
        let max = log_weights
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        let unnorm: Vec<f64> = log_weights.iter().map(|w| (w - max).exp()).collect();
        let total: f64 = unnorm.iter().sum();
        Some(Self {
            probs: unnorm.into_iter().map(|p| p / total).collect(),
        })
    }

    /// A single-trial multinomial draw: returns the index of the chosen category.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let r: f64 = rng.gen();
        let mut cum = 0.0;
        for (i, &p) in self.probs.iter().enumerate() {
            cum += p;
            if r < cum {
                return i;
            }
        }
        // Rounding can leave `cum` just below 1; fall back to the last category with mass.
        self.probs
            .iter()
            .rposition(|&p| p > 0.0)
            .unwrap_or(self.probs.len() - 1)
    }
}
