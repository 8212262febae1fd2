//! Block Gibbs sampling for the Gaussian mixture.
//!
//! One iteration draws a latent [`Assignment`] from the current parameters and
//! then performs one sweep of conjugate draws:
//!
//! 1. per component, `sigmasq_j = 1 / Gamma(shape, scale)` with
//!    `shape = (n_j - 1) / 2` and `scale = 1 / ((n_j - 1) / 2 * s_j^2)`,
//!    where `s_j^2` is the Bessel-corrected variance of the component's members;
//! 2. `mu_j ~ Normal(mean of members, sqrt(sigmasq_j))`;
//! 3. `alpha ~ Dirichlet(n_1 + 1, ..., n_K + 1)`.
//!
//! A [`VariancePrior`] adds its shape and rate to step 1, which keeps the draw
//! proper for components whose members are all equal.

use log::debug;
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use rand_distr::{Dirichlet, Distribution, Gamma, Normal};

use crate::assignment::{Assignment, AssignmentSampler, MIN_OCCUPANCY};
use crate::core::{run_chain, MixtureSampler, Trace};
use crate::error::{ChainError, MixtureError};
use crate::model::{Observations, Parameters};
use crate::stats::{sample_mean, sample_variance};

/// Conjugate inverse-gamma prior on each component variance.
///
/// `shape` is added to the Gamma shape and `rate` to the Gamma rate of the
/// precision draw. `shape = rate = 0` gives the flat-prior conditional exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariancePrior {
    pub shape: f64,
    pub rate: f64,
}

impl Default for VariancePrior {
    fn default() -> Self {
        Self {
            shape: 0.0,
            rate: 1e-6,
        }
    }
}

impl VariancePrior {
    /// The prior that leaves the conditional untouched.
    pub fn flat() -> Self {
        Self {
            shape: 0.0,
            rate: 0.0,
        }
    }

    /// # Errors
    ///
    /// `InvalidVariancePrior` for negative or non-finite hyperparameters.
    pub fn validate(&self) -> Result<(), MixtureError> {
        let ok = |v: f64| v >= 0.0 && v.is_finite();
        if ok(self.shape) && ok(self.rate) {
            Ok(())
        } else {
            Err(MixtureError::InvalidVariancePrior {
                shape: self.shape,
                rate: self.rate,
            })
        }
    }
}

/// A single Gibbs chain over `mu`, `sigmasq` and all `K` mixing weights.
#[derive(Debug, Clone)]
pub struct GibbsSampler {
    pub observations: Observations,
    pub current_state: Parameters,
    pub prior: VariancePrior,
    pub assignment_sampler: AssignmentSampler,
    /// Random seed used by [`GibbsSampler::run`].
    pub seed: u64,
    last_assignment: Option<Assignment>,
}

impl GibbsSampler {
    /// Creates a chain at `initial_state`; a `K - 1` prefix `alpha` is completed.
    pub fn new(
        observations: Observations,
        initial_state: Parameters,
        prior: VariancePrior,
        max_assignment_attempts: usize,
    ) -> Self {
        Self {
            observations,
            current_state: initial_state.with_full_alpha(),
            prior,
            assignment_sampler: AssignmentSampler::new(max_assignment_attempts),
            seed: thread_rng().gen::<u64>(),
            last_assignment: None,
        }
    }

    /// Sets a new seed for [`GibbsSampler::run`].
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The assignment consumed by the most recent sweep.
    pub fn last_assignment(&self) -> Option<&Assignment> {
        self.last_assignment.as_ref()
    }

    /// Runs `n_steps` iterations from a `SmallRng` seeded with `self.seed`.
    pub fn run(&mut self, n_steps: usize) -> Result<Trace, ChainError> {
        let mut rng = SmallRng::seed_from_u64(self.seed);
        run_chain(self, n_steps, None, &mut rng)
    }

    /// Dirichlet concentration `n_j + 1` for every component.
    pub fn dirichlet_concentration(assignment: &Assignment) -> Vec<f64> {
        assignment.counts().iter().map(|&n| n as f64 + 1.0).collect()
    }

    /// One sweep of conjugate draws given `assignment`.
    ///
    /// # Errors
    ///
    /// `NumericalInstability` when a component has fewer than two members, a
    /// variance draw is non-positive or non-finite, or a distribution cannot
    /// be constructed from the data.
    pub fn sweep<R: Rng + ?Sized>(
        &self,
        assignment: &Assignment,
        rng: &mut R,
    ) -> Result<Parameters, MixtureError> {
        let k = assignment.n_components();
        let mut mu = Array1::zeros(k);
        let mut sigmasq = Array1::zeros(k);

        for j in 0..k {
            let y_j: Vec<f64> = assignment.members(j, &self.observations).collect();
            let n_j = y_j.len();
            if n_j < MIN_OCCUPANCY {
                return Err(MixtureError::numerical(
                    "component occupancy",
                    Some(j),
                    n_j as f64,
                ));
            }
            let (Some(mean), Some(s2)) = (sample_mean(&y_j), sample_variance(&y_j)) else {
                return Err(MixtureError::numerical("sample moments", Some(j), n_j as f64));
            };

            let half_dof = 0.5 * (n_j - 1) as f64;
            let shape = half_dof + self.prior.shape;
            let rate = half_dof * s2 + self.prior.rate;
            let gamma = Gamma::new(shape, 1.0 / rate)
                .map_err(|_| MixtureError::numerical("precision rate", Some(j), rate))?;
            let sigmasq_j = 1.0 / gamma.sample(rng);
            if !(sigmasq_j > 0.0 && sigmasq_j.is_finite()) {
                return Err(MixtureError::numerical("variance draw", Some(j), sigmasq_j));
            }

            let normal = Normal::new(mean, sigmasq_j.sqrt())
                .map_err(|_| MixtureError::numerical("mean draw", Some(j), sigmasq_j))?;
            mu[j] = normal.sample(rng);
            sigmasq[j] = sigmasq_j;
        }

        let concentration = Self::dirichlet_concentration(assignment);
        let dirichlet = Dirichlet::new(&concentration)
            .map_err(|_| MixtureError::numerical("dirichlet concentration", None, concentration[0]))?;
        let alpha = Array1::from(dirichlet.sample(rng));
        if let Some((j, &a)) = alpha.iter().enumerate().find(|(_, a)| !a.is_finite()) {
            return Err(MixtureError::numerical("mixing weight draw", Some(j), a));
        }

        Ok(Parameters::new(mu, sigmasq, alpha))
    }
}

impl MixtureSampler for GibbsSampler {
    /// Draws an assignment from the current parameters, then sweeps.
    fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<&Parameters, MixtureError> {
        let assignment = self
            .assignment_sampler
            .sample(&self.current_state, &self.observations, rng)?;
        let next = self.sweep(&assignment, rng)?;
        debug!(
            "gibbs: counts={} mu={} sigmasq={} alpha={}",
            assignment.counts(),
            next.mu,
            next.sigmasq,
            next.alpha
        );
        self.current_state = next;
        self.last_assignment = Some(assignment);
        Ok(&self.current_state)
    }

    fn current_state(&self) -> &Parameters {
        &self.current_state
    }

    fn name(&self) -> &'static str {
        "Gibbs"
    }
}
