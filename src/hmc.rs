//! Hamiltonian Monte Carlo over the continuous mixture parameters.
//!
//! Each outer iteration:
//! 1. draws the latent [`Assignment`] from the current state and freezes it for
//!    the whole trajectory;
//! 2. draws independent Gaussian momenta for the `mu`, `sigmasq` and `alpha`
//!    blocks, each with its own diagonal mass matrix;
//! 3. runs `n_leapfrog` leapfrog steps, negating all momenta whenever a position
//!    update leaves the region accepted by [`is_valid`];
//! 4. accepts the end point with probability `min(1, r)`, where `log r` is the
//!    change in log-posterior plus momentum log-density.
//!
//! `alpha` is carried as its `K - 1` free coordinates throughout.

use log::{debug, trace, warn};
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};

use crate::assignment::{Assignment, AssignmentSampler};
use crate::config::HmcConfig;
use crate::core::{run_chain, MixtureSampler, Trace};
use crate::distributions::IsotropicGaussian;
use crate::error::{ChainError, MixtureError};
use crate::model::{Observations, Parameters};
use crate::posterior::{in_support, is_valid, PosteriorEvaluator};

/// Momentum for every parameter block.
#[derive(Debug, Clone, PartialEq)]
pub struct Momentum {
    pub mu: Array1<f64>,
    pub sigmasq: Array1<f64>,
    pub alpha: Array1<f64>,
}

impl Momentum {
    fn negate(&mut self) {
        self.mu.mapv_inplace(|p| -p);
        self.sigmasq.mapv_inplace(|p| -p);
        self.alpha.mapv_inplace(|p| -p);
    }
}

/// The end point of one trajectory and its Metropolis-Hastings log ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub params: Parameters,
    pub momentum: Momentum,
    /// `-inf` when the end point lies outside the posterior's support.
    pub log_accept_ratio: f64,
}

/// A single HMC chain with fixed step size, trajectory length and mass matrices.
#[derive(Debug, Clone)]
pub struct HmcSampler {
    pub observations: Observations,
    pub current_state: Parameters,
    pub config: HmcConfig,
    pub assignment_sampler: AssignmentSampler,
    /// Random seed used by [`HmcSampler::run`].
    pub seed: u64,
    mom_mu: IsotropicGaussian,
    mom_sigmasq: IsotropicGaussian,
    mom_alpha: IsotropicGaussian,
    n_proposed: usize,
    n_accepted: usize,
}

impl HmcSampler {
    /// Creates a chain at `initial_state`; a full `K`-point `alpha` is reduced
    /// to its first `K - 1` coordinates.
    ///
    /// # Errors
    ///
    /// Any error of [`HmcConfig::validate`], `TooFewComponents` for `K < 2` and
    /// `DimensionMismatch` for inconsistent initial vectors.
    pub fn new(
        observations: Observations,
        initial_state: Parameters,
        config: HmcConfig,
        max_assignment_attempts: usize,
    ) -> Result<Self, MixtureError> {
        config.validate()?;
        let k = initial_state.n_components();
        if k < 2 {
            return Err(MixtureError::TooFewComponents(k));
        }
        if initial_state.sigmasq.len() != k {
            return Err(MixtureError::DimensionMismatch {
                name: "sigmasq",
                expected: k,
                actual: initial_state.sigmasq.len(),
            });
        }
        let alpha_len = initial_state.alpha.len();
        if alpha_len != k && alpha_len != k - 1 {
            return Err(MixtureError::DimensionMismatch {
                name: "alpha",
                expected: k - 1,
                actual: alpha_len,
            });
        }
        if max_assignment_attempts == 0 {
            return Err(MixtureError::InvalidRetryBound);
        }

        Ok(Self {
            observations,
            current_state: initial_state.with_alpha_prefix(),
            mom_mu: IsotropicGaussian::new(config.mass_mu),
            mom_sigmasq: IsotropicGaussian::new(config.mass_sigmasq),
            mom_alpha: IsotropicGaussian::new(config.mass_alpha),
            config,
            assignment_sampler: AssignmentSampler::new(max_assignment_attempts),
            seed: thread_rng().gen::<u64>(),
            n_proposed: 0,
            n_accepted: 0,
        })
    }

    /// Sets a new seed for [`HmcSampler::run`].
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Runs `n_steps` iterations from a `SmallRng` seeded with `self.seed`.
    pub fn run(&mut self, n_steps: usize) -> Result<Trace, ChainError> {
        let mut rng = SmallRng::seed_from_u64(self.seed);
        run_chain(self, n_steps, None, &mut rng)
    }

    /// Fraction of proposals accepted so far, `0` before the first step.
    pub fn acceptance_rate(&self) -> f64 {
        if self.n_proposed == 0 {
            0.0
        } else {
            self.n_accepted as f64 / self.n_proposed as f64
        }
    }

    fn evaluator(&self) -> PosteriorEvaluator<'_> {
        PosteriorEvaluator::new(&self.observations).with_gradient_mode(self.config.gradient_mode)
    }

    /// Draws fresh momenta, one block at a time.
    pub fn sample_momentum<R: Rng + ?Sized>(&self, rng: &mut R) -> Momentum {
        let k = self.current_state.n_components();
        Momentum {
            mu: self.mom_mu.sample(k, rng),
            sigmasq: self.mom_sigmasq.sample(k, rng),
            alpha: self.mom_alpha.sample(k - 1, rng),
        }
    }

    /// Sum of the momentum log-densities under their mass matrices.
    pub fn momentum_log_density(&self, phi: &Momentum) -> f64 {
        self.mom_mu.log_prob(&phi.mu)
            + self.mom_sigmasq.log_prob(&phi.sigmasq)
            + self.mom_alpha.log_prob(&phi.alpha)
    }

    fn half_kick(
        &self,
        pos: &Parameters,
        phi: &mut Momentum,
        assignment: &Assignment,
    ) -> Result<(), MixtureError> {
        let grad = self.evaluator().gradients(pos, assignment)?;
        let half = 0.5 * self.config.step_size;
        phi.mu.scaled_add(half, &grad.mu);
        phi.sigmasq.scaled_add(half, &grad.sigmasq);
        phi.alpha.scaled_add(half, &grad.alpha);
        Ok(())
    }

    /// Integrates from the current state with momentum `phi_init`, holding
    /// `assignment` fixed, and returns the end point with its log acceptance ratio.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when `assignment` or `phi_init` does not match the
    /// current state. `NumericalInstability` when the log acceptance ratio is
    /// NaN or `+inf`, or the current state's log-posterior is undefined.
    pub fn propose(
        &self,
        assignment: &Assignment,
        phi_init: &Momentum,
    ) -> Result<Proposal, MixtureError> {
        self.evaluator().check_dims(&self.current_state, assignment)?;
        let k = self.current_state.n_components();
        for (name, expected, actual) in [
            ("momentum mu", k, phi_init.mu.len()),
            ("momentum sigmasq", k, phi_init.sigmasq.len()),
            ("momentum alpha", k - 1, phi_init.alpha.len()),
        ] {
            if expected != actual {
                return Err(MixtureError::DimensionMismatch {
                    name,
                    expected,
                    actual,
                });
            }
        }

        let eps = self.config.step_size;
        let mut pos = self.current_state.clone();
        let mut phi = phi_init.clone();

        for _ in 0..self.config.n_leapfrog {
            self.half_kick(&pos, &mut phi, assignment)?;
            pos.mu.scaled_add(eps, &self.mom_mu.velocity(&phi.mu));
            pos.sigmasq
                .scaled_add(eps, &self.mom_sigmasq.velocity(&phi.sigmasq));
            pos.alpha.scaled_add(eps, &self.mom_alpha.velocity(&phi.alpha));
            if !is_valid(&pos) {
                phi.negate();
            }
            self.half_kick(&pos, &mut phi, assignment)?;
        }

        if !in_support(&pos) {
            warn!(
                "hmc: trajectory ended outside the support (sigmasq={}, alpha={}); rejecting",
                pos.sigmasq, pos.alpha
            );
            return Ok(Proposal {
                params: pos,
                momentum: phi,
                log_accept_ratio: f64::NEG_INFINITY,
            });
        }

        let eval = self.evaluator();
        let lp_new = eval.log_posterior(&pos, assignment)?;
        let lp_old = eval.log_posterior(&self.current_state, assignment)?;
        let log_r = (lp_new + self.momentum_log_density(&phi))
            - (lp_old + self.momentum_log_density(phi_init));
        if log_r.is_nan() || log_r == f64::INFINITY {
            return Err(MixtureError::numerical("log acceptance ratio", None, log_r));
        }

        Ok(Proposal {
            params: pos,
            momentum: phi,
            log_accept_ratio: log_r,
        })
    }
}

impl MixtureSampler for HmcSampler {
    /// Draws the assignment for this trajectory, proposes, then accepts or
    /// keeps an exact copy of the previous state.
    fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<&Parameters, MixtureError> {
        let assignment = self
            .assignment_sampler
            .sample(&self.current_state, &self.observations, rng)?;
        let phi = self.sample_momentum(rng);
        let proposal = self.propose(&assignment, &phi)?;

        let u: f64 = rng.gen();
        let accepted = u < proposal.log_accept_ratio.exp();
        trace!(
            "hmc: log r={:.4} u={u:.4} accepted={accepted}",
            proposal.log_accept_ratio
        );

        self.n_proposed += 1;
        if accepted {
            self.n_accepted += 1;
            self.current_state = proposal.params;
        }
        debug!(
            "hmc: mu={} sigmasq={} alpha={}",
            self.current_state.mu, self.current_state.sigmasq, self.current_state.alpha
        );
        Ok(&self.current_state)
    }

    fn current_state(&self) -> &Parameters {
        &self.current_state
    }

    fn name(&self) -> &'static str {
        "HMC"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GradientMode;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn scenario_data() -> Observations {
        Observations::new(vec![1.0, 1.0, 1.0, 1.0, 5.0, 5.0, 5.0, 5.0]).unwrap()
    }

    fn sampler(config: HmcConfig) -> HmcSampler {
        let init = Parameters::new(array![1.0, 5.0], array![1.0, 1.0], array![0.5]);
        HmcSampler::new(scenario_data(), init, config, 100).unwrap()
    }

    #[test]
    fn construction_validates_dimensions() {
        let init = Parameters::new(array![0.0, 0.0], array![1.0], array![0.5]);
        assert_eq!(
            HmcSampler::new(scenario_data(), init, HmcConfig::default(), 10).unwrap_err(),
            MixtureError::DimensionMismatch {
                name: "sigmasq",
                expected: 2,
                actual: 1
            }
        );
        let init = Parameters::new(array![0.0, 0.0], array![1.0, 1.0], array![0.5, 0.5]);
        let s = HmcSampler::new(scenario_data(), init, HmcConfig::default(), 10).unwrap();
        assert_eq!(s.current_state.alpha, array![0.5]);
    }

    #[test]
    fn zero_length_trajectory_cancels_exactly() {
        let s = sampler(HmcConfig::new(0, 0.01));
        let mut rng = SmallRng::seed_from_u64(5);
        let assignment = s
            .assignment_sampler
            .sample(&s.current_state, &s.observations, &mut rng)
            .unwrap();
        for _ in 0..20 {
            let phi = s.sample_momentum(&mut rng);
            let proposal = s.propose(&assignment, &phi).unwrap();
            assert_eq!(proposal.params, s.current_state);
            assert_eq!(proposal.momentum, phi);
            assert_eq!(proposal.log_accept_ratio, 0.0);
        }
    }

    #[test]
    fn zero_length_chain_never_moves() {
        let mut s = sampler(HmcConfig::new(0, 0.01)).set_seed(9);
        let init = s.current_state.clone();
        let trace = s.run(15).unwrap();
        assert_eq!(trace.len(), 16);
        assert!(trace.iter().all(|p| *p == init));
        assert_eq!(s.acceptance_rate(), 1.0);
    }

    #[test]
    fn momentum_log_density_sums_blocks() {
        let s = sampler(HmcConfig::default());
        let phi = Momentum {
            mu: array![0.1, -0.2],
            sigmasq: array![0.3, 0.0],
            alpha: array![0.4],
        };
        let expected = IsotropicGaussian::new(0.5).log_prob(&phi.mu)
            + IsotropicGaussian::new(1.0).log_prob(&phi.sigmasq)
            + IsotropicGaussian::new(0.3).log_prob(&phi.alpha);
        assert_abs_diff_eq!(s.momentum_log_density(&phi), expected, epsilon = 1e-12);
    }

    #[test]
    fn single_leapfrog_step_matches_hand_update() {
        let s = sampler(HmcConfig::new(1, 0.1).with_gradient_mode(GradientMode::Analytic));
        let assignment = Assignment::from_labels(vec![0, 0, 0, 0, 1, 1, 1, 1], 2).unwrap();
        let phi = Momentum {
            mu: array![0.2, -0.1],
            sigmasq: array![0.0, 0.0],
            alpha: array![0.0],
        };
        let proposal = s.propose(&assignment, &phi).unwrap();
        // At mu = data means the mu gradient vanishes, so mu drifts by eps * phi / m.
        assert_abs_diff_eq!(
            proposal.params.mu,
            array![1.0 + 0.1 * 0.2 / 0.5, 5.0 - 0.1 * 0.1 / 0.5],
            epsilon = 1e-12
        );
        // sigmasq gradient at the start is -0.5 * 4 / 1 = -2 per component.
        assert_abs_diff_eq!(
            proposal.params.sigmasq,
            array![1.0 - 0.1 * 0.05 * 2.0, 1.0 - 0.1 * 0.05 * 2.0],
            epsilon = 1e-12
        );
        // Equal counts and alpha = 0.5 make the alpha gradient zero.
        assert_abs_diff_eq!(proposal.params.alpha, array![0.5], epsilon = 1e-12);
        assert!(proposal.log_accept_ratio.is_finite());
    }

    #[test]
    fn leaving_the_support_is_rejected() {
        let s = sampler(HmcConfig::new(1, 0.5));
        let assignment = Assignment::from_labels(vec![0, 0, 0, 0, 1, 1, 1, 1], 2).unwrap();
        let phi = Momentum {
            mu: array![0.0, 0.0],
            sigmasq: array![0.0, 0.0],
            alpha: array![2.0],
        };
        let proposal = s.propose(&assignment, &phi).unwrap();
        assert_eq!(proposal.log_accept_ratio, f64::NEG_INFINITY);
        // Leaving the valid region flipped the momentum.
        assert!(proposal.momentum.alpha[0] < 0.0);
    }

    #[test]
    fn non_finite_momentum_is_numerical_error() {
        let s = sampler(HmcConfig::new(0, 0.01));
        let assignment = Assignment::from_labels(vec![0, 0, 0, 0, 1, 1, 1, 1], 2).unwrap();
        let phi = Momentum {
            mu: array![f64::NAN, 0.0],
            sigmasq: array![0.0, 0.0],
            alpha: array![0.0],
        };
        assert!(matches!(
            s.propose(&assignment, &phi),
            Err(MixtureError::NumericalInstability {
                quantity: "log acceptance ratio",
                component: None,
                ..
            })
        ));
    }

    #[test]
    fn mismatched_inputs_are_dimension_errors() {
        let s = sampler(HmcConfig::new(3, 0.01));
        let mut rng = SmallRng::seed_from_u64(2);
        let phi = s.sample_momentum(&mut rng);

        let three = Assignment::from_labels(vec![0, 0, 1, 1, 2, 2, 2, 2], 3).unwrap();
        assert_eq!(
            s.propose(&three, &phi).unwrap_err(),
            MixtureError::DimensionMismatch {
                name: "assignment components",
                expected: 2,
                actual: 3
            }
        );

        let assignment = Assignment::from_labels(vec![0, 0, 0, 0, 1, 1, 1, 1], 2).unwrap();
        let short = Momentum {
            alpha: array![0.1, 0.2],
            ..phi
        };
        assert_eq!(
            s.propose(&assignment, &short).unwrap_err(),
            MixtureError::DimensionMismatch {
                name: "momentum alpha",
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn seeded_runs_are_identical() {
        let s = sampler(HmcConfig::default()).set_seed(21);
        let a = s.clone().run(40).unwrap();
        let b = s.clone().run(40).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 41);
    }
}
