//! Observations, parameter snapshots and the model entry point.
//!
//! A [`NormalMixtureModel`] owns the validated observations and the initial
//! parameter state. It hands out [`GibbsSampler`]s and [`HmcSampler`]s that
//! share those observations and are driven by [`crate::core::run_chain`].

use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};

use crate::config::{HmcConfig, MixtureConfig, RunConfig, SamplerKind};
use crate::core::{run_chain, Trace};
use crate::error::{ChainError, MixtureError};
use crate::gibbs::GibbsSampler;
use crate::hmc::HmcSampler;

/// An immutable, nonempty sequence of finite observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Observations {
    values: Array1<f64>,
}

impl Observations {
    /// Validates `values` once; every sampler afterwards assumes finite, nonempty data.
    pub fn new(values: Vec<f64>) -> Result<Self, MixtureError> {
        if values.is_empty() {
            return Err(MixtureError::EmptyObservations);
        }
        if let Some((index, &value)) = values.iter().enumerate().find(|(_, y)| !y.is_finite()) {
            return Err(MixtureError::NonFiniteObservation { index, value });
        }
        Ok(Self {
            values: Array1::from(values),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }
}

impl TryFrom<Vec<f64>> for Observations {
    type Error = MixtureError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

/// One snapshot of the continuous mixture parameters.
///
/// `alpha` holds either all `K` mixing weights (Gibbs) or only the first
/// `K - 1` free coordinates (HMC), with the last weight implied as one minus
/// their sum. Use [`Parameters::mixing_weights`] to get all `K` of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub mu: Array1<f64>,
    pub sigmasq: Array1<f64>,
    pub alpha: Array1<f64>,
}

impl Parameters {
    pub fn new(mu: Array1<f64>, sigmasq: Array1<f64>, alpha: Array1<f64>) -> Self {
        Self { mu, sigmasq, alpha }
    }

    /// Number of mixture components `K`.
    pub fn n_components(&self) -> usize {
        self.mu.len()
    }

    /// The implied last mixing weight `1 - sum(alpha)` of a `K - 1` prefix.
    pub fn implied_tail(&self) -> f64 {
        1.0 - self.alpha.sum()
    }

    /// All `K` mixing weights, completing a `K - 1` prefix with its implied tail.
    pub fn mixing_weights(&self) -> Array1<f64> {
        if self.alpha.len() + 1 == self.n_components() {
            let mut full = Array1::zeros(self.n_components());
            full.slice_mut(ndarray::s![..self.alpha.len()])
                .assign(&self.alpha);
            full[self.alpha.len()] = self.implied_tail();
            full
        } else {
            self.alpha.clone()
        }
    }

    /// The same snapshot with `alpha` reduced to its first `K - 1` coordinates.
    pub fn with_alpha_prefix(&self) -> Self {
        let k = self.n_components();
        let alpha = if self.alpha.len() == k {
            self.alpha.slice(ndarray::s![..k - 1]).to_owned()
        } else {
            self.alpha.clone()
        };
        Self {
            mu: self.mu.clone(),
            sigmasq: self.sigmasq.clone(),
            alpha,
        }
    }

    /// The same snapshot with all `K` mixing weights stored explicitly.
    pub fn with_full_alpha(&self) -> Self {
        Self {
            mu: self.mu.clone(),
            sigmasq: self.sigmasq.clone(),
            alpha: self.mixing_weights(),
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.mu
            .iter()
            .chain(self.sigmasq.iter())
            .chain(self.alpha.iter())
            .all(|x| x.is_finite())
    }
}

/// A finite Gaussian mixture over a fixed observation sequence.
#[derive(Debug, Clone)]
pub struct NormalMixtureModel {
    observations: Observations,
    config: MixtureConfig,
    initial: Parameters,
}

impl NormalMixtureModel {
    /// Validates the data and configuration and fills in default initial values:
    /// zeros for `mu`, ones for `sigmasq` and uniform `1 / K` mixing weights.
    pub fn new(data: Vec<f64>, config: MixtureConfig) -> Result<Self, MixtureError> {
        let observations = Observations::new(data)?;
        config.validate()?;
        let k = config.n_components;

        let mu = config
            .mu_init
            .clone()
            .map_or_else(|| Array1::zeros(k), Array1::from);
        let sigmasq = config
            .sigmasq_init
            .clone()
            .map_or_else(|| Array1::ones(k), Array1::from);
        let alpha = config
            .alpha_init
            .clone()
            .map_or_else(|| Array1::from_elem(k, 1.0 / k as f64), Array1::from);
        let initial = Parameters::new(mu, sigmasq, alpha).with_full_alpha();

        Ok(Self {
            observations,
            config,
            initial,
        })
    }

    pub fn observations(&self) -> &Observations {
        &self.observations
    }

    pub fn n_components(&self) -> usize {
        self.config.n_components
    }

    pub fn config(&self) -> &MixtureConfig {
        &self.config
    }

    /// Initial state with all `K` mixing weights.
    pub fn initial_parameters(&self) -> &Parameters {
        &self.initial
    }

    /// A Gibbs sampler starting from the configured initial state.
    pub fn gibbs_sampler(&self) -> GibbsSampler {
        GibbsSampler::new(
            self.observations.clone(),
            self.initial.clone(),
            self.config.variance_prior,
            self.config.max_assignment_attempts,
        )
    }

    /// An HMC sampler starting from the configured initial state, with `alpha`
    /// reduced to its `K - 1` free coordinates.
    pub fn hmc_sampler(&self, hmc: HmcConfig) -> Result<HmcSampler, MixtureError> {
        HmcSampler::new(
            self.observations.clone(),
            self.initial.with_alpha_prefix(),
            hmc,
            self.config.max_assignment_attempts,
        )
    }

    /// Runs the sampler chosen in `run` and returns its trace.
    ///
    /// The random source is a `SmallRng` seeded from `run.seed`, or from the
    /// thread RNG when no seed is given.
    pub fn sample(&self, run: &RunConfig) -> Result<Trace, ChainError> {
        let seed = run.seed.unwrap_or_else(|| thread_rng().gen::<u64>());
        let mut rng = SmallRng::seed_from_u64(seed);
        self.sample_with_rng(run, &mut rng)
    }

    /// Like [`NormalMixtureModel::sample`], drawing from a caller-provided RNG.
    pub fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        run: &RunConfig,
        rng: &mut R,
    ) -> Result<Trace, ChainError> {
        let setup_failure = |source| ChainError {
            iteration: 0,
            source,
            trace: Trace::default(),
        };
        run.validate().map_err(setup_failure)?;
        match &run.sampler {
            SamplerKind::Gibbs => {
                let mut sampler = self.gibbs_sampler();
                run_chain(&mut sampler, run.chain_length, run.time_budget, rng)
            }
            SamplerKind::Hmc(hmc) => {
                let mut sampler = self.hmc_sampler(hmc.clone()).map_err(setup_failure)?;
                run_chain(&mut sampler, run.chain_length, run.time_budget, rng)
            }
        }
    }
}
