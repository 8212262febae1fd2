//! Model, sampler and run configuration.
//!
//! Every struct has a `Default` and a `validate` method. Validation happens
//! once, before any draws are made.

use std::time::Duration;

use crate::error::MixtureError;
use crate::gibbs::VariancePrior;

/// Shape of the model and its starting point.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureConfig {
    /// Number of components `K`, at least 2.
    pub n_components: usize,
    /// Initial means, length `K`. Zeros when omitted.
    pub mu_init: Option<Vec<f64>>,
    /// Initial variances, length `K`. Ones when omitted.
    pub sigmasq_init: Option<Vec<f64>>,
    /// Initial mixing weights, length `K` or `K - 1`. Uniform when omitted.
    pub alpha_init: Option<Vec<f64>>,
    /// Upper bound on full redraws of the latent assignment per iteration.
    pub max_assignment_attempts: usize,
    /// Prior on component variances used by the Gibbs sweep.
    pub variance_prior: VariancePrior,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        Self {
            n_components: 2,
            mu_init: None,
            sigmasq_init: None,
            alpha_init: None,
            max_assignment_attempts: 1_000,
            variance_prior: VariancePrior::default(),
        }
    }
}

impl MixtureConfig {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            ..Self::default()
        }
    }

    pub fn with_mu(mut self, mu: Vec<f64>) -> Self {
        self.mu_init = Some(mu);
        self
    }

    pub fn with_sigmasq(mut self, sigmasq: Vec<f64>) -> Self {
        self.sigmasq_init = Some(sigmasq);
        self
    }

    pub fn with_alpha(mut self, alpha: Vec<f64>) -> Self {
        self.alpha_init = Some(alpha);
        self
    }

    pub fn with_max_assignment_attempts(mut self, attempts: usize) -> Self {
        self.max_assignment_attempts = attempts;
        self
    }

    pub fn with_variance_prior(mut self, prior: VariancePrior) -> Self {
        self.variance_prior = prior;
        self
    }

    /// # Errors
    ///
    /// `TooFewComponents` for `K < 2`, `DimensionMismatch` for initial vectors of
    /// the wrong length, `InvalidRetryBound` for a zero attempt bound and
    /// `InvalidVariancePrior` for negative prior hyperparameters.
    pub fn validate(&self) -> Result<(), MixtureError> {
        let k = self.n_components;
        if k < 2 {
            return Err(MixtureError::TooFewComponents(k));
        }
        check_len("mu_init", self.mu_init.as_deref(), &[k])?;
        check_len("sigmasq_init", self.sigmasq_init.as_deref(), &[k])?;
        check_len("alpha_init", self.alpha_init.as_deref(), &[k, k - 1])?;
        if self.max_assignment_attempts == 0 {
            return Err(MixtureError::InvalidRetryBound);
        }
        self.variance_prior.validate()
    }
}

fn check_len(name: &'static str, values: Option<&[f64]>, allowed: &[usize]) -> Result<(), MixtureError> {
    match values {
        Some(v) if !allowed.contains(&v.len()) => Err(MixtureError::DimensionMismatch {
            name,
            expected: allowed[0],
            actual: v.len(),
        }),
        _ => Ok(()),
    }
}

/// Which form of the `mu` and `alpha` gradients the leapfrog integrator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientMode {
    /// `mu` gradient scaled by an extra factor `mu_j`, and the `alpha`
    /// gradient's tail term divided by the sum of the free weights.
    #[default]
    Literal,
    /// Exact derivatives of the log-posterior.
    Analytic,
}

/// Settings for the Hamiltonian sampler. No adaptation happens during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct HmcConfig {
    /// Leapfrog steps per trajectory. Zero gives a trajectory that never moves.
    pub n_leapfrog: usize,
    pub step_size: f64,
    /// Diagonal of the mass matrix for the `mu` momentum.
    pub mass_mu: f64,
    /// Diagonal of the mass matrix for the `sigmasq` momentum.
    pub mass_sigmasq: f64,
    /// Diagonal of the mass matrix for the `alpha` momentum.
    pub mass_alpha: f64,
    pub gradient_mode: GradientMode,
}

impl Default for HmcConfig {
    fn default() -> Self {
        Self {
            n_leapfrog: 10,
            step_size: 0.01,
            mass_mu: 0.5,
            mass_sigmasq: 1.0,
            mass_alpha: 0.3,
            gradient_mode: GradientMode::Literal,
        }
    }
}

impl HmcConfig {
    pub fn new(n_leapfrog: usize, step_size: f64) -> Self {
        Self {
            n_leapfrog,
            step_size,
            ..Self::default()
        }
    }

    pub fn with_mass(mut self, mu: f64, sigmasq: f64, alpha: f64) -> Self {
        self.mass_mu = mu;
        self.mass_sigmasq = sigmasq;
        self.mass_alpha = alpha;
        self
    }

    pub fn with_gradient_mode(mut self, mode: GradientMode) -> Self {
        self.gradient_mode = mode;
        self
    }

    /// # Errors
    ///
    /// `InvalidStepSize` or `InvalidMassScale` for non-positive or non-finite values.
    pub fn validate(&self) -> Result<(), MixtureError> {
        if !(self.step_size > 0.0 && self.step_size.is_finite()) {
            return Err(MixtureError::InvalidStepSize(self.step_size));
        }
        for (block, value) in [
            ("mu", self.mass_mu),
            ("sigmasq", self.mass_sigmasq),
            ("alpha", self.mass_alpha),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(MixtureError::InvalidMassScale { block, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SamplerKind {
    #[default]
    Gibbs,
    Hmc(HmcConfig),
}

/// How long to run and with which sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub sampler: SamplerKind,
    /// Number of outer iterations `T`; the trace holds `T + 1` snapshots.
    pub chain_length: usize,
    /// Seed for the run's `SmallRng`. Drawn from the thread RNG when `None`.
    pub seed: Option<u64>,
    /// Wall-clock budget, checked between outer iterations.
    pub time_budget: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerKind::Gibbs,
            chain_length: 1_000,
            seed: None,
            time_budget: None,
        }
    }
}

impl RunConfig {
    pub fn gibbs(chain_length: usize) -> Self {
        Self {
            sampler: SamplerKind::Gibbs,
            chain_length,
            ..Self::default()
        }
    }

    pub fn hmc(chain_length: usize, hmc: HmcConfig) -> Self {
        Self {
            sampler: SamplerKind::Hmc(hmc),
            chain_length,
            ..Self::default()
        }
    }

    /// Sets a new seed.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// # Errors
    ///
    /// `InvalidChainLength` for `T = 0`, plus any error of the HMC settings.
    pub fn validate(&self) -> Result<(), MixtureError> {
        if self.chain_length == 0 {
            return Err(MixtureError::InvalidChainLength);
        }
        if let SamplerKind::Hmc(hmc) = &self.sampler {
            hmc.validate()?;
        }
        Ok(())
    }
}
