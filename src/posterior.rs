//! Log-joint density, its gradients, and the support check used by HMC.
//!
//! Everything here works with the `K - 1` prefix representation of `alpha`
//! and a fixed latent [`Assignment`]. The evaluator reduces the data to
//! per-component sufficient statistics once for each parameter state.

use ndarray::Array1;

use crate::assignment::Assignment;
use crate::config::GradientMode;
use crate::error::MixtureError;
use crate::model::{Observations, Parameters};

/// Gradients of the log-posterior with respect to each parameter block.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub mu: Array1<f64>,
    pub sigmasq: Array1<f64>,
    pub alpha: Array1<f64>,
}

/// `n_j`, `sum_i I_ij (y_i - mu_j)` and `sum_i I_ij (y_i - mu_j)^2` per component.
#[derive(Debug, Clone)]
struct ComponentStats {
    counts: Array1<f64>,
    resid: Array1<f64>,
    resid_sq: Array1<f64>,
}

impl ComponentStats {
    fn new(mu: &Array1<f64>, assignment: &Assignment, observations: &Observations) -> Self {
        let k = mu.len();
        let mut resid = Array1::zeros(k);
        let mut resid_sq = Array1::zeros(k);
        for (&j, &y) in assignment.labels().iter().zip(observations.iter()) {
            let d = y - mu[j];
            resid[j] += d;
            resid_sq[j] += d * d;
        }
        Self {
            counts: assignment.counts().mapv(|n| n as f64),
            resid,
            resid_sq,
        }
    }
}

/// Evaluates the unnormalized log-posterior of the mixture given an assignment.
#[derive(Debug, Clone)]
pub struct PosteriorEvaluator<'a> {
    observations: &'a Observations,
    mode: GradientMode,
}

impl<'a> PosteriorEvaluator<'a> {
    pub fn new(observations: &'a Observations) -> Self {
        Self {
            observations,
            mode: GradientMode::Literal,
        }
    }

    pub fn with_gradient_mode(mut self, mode: GradientMode) -> Self {
        self.mode = mode;
        self
    }

    /// `params` must be in prefix form with `K >= 2`, and `assignment` must
    /// label every observation with one of the same `K` components.
    pub(crate) fn check_dims(
        &self,
        params: &Parameters,
        assignment: &Assignment,
    ) -> Result<(), MixtureError> {
        let k = params.n_components();
        if k < 2 {
            return Err(MixtureError::TooFewComponents(k));
        }
        for (name, expected, actual) in [
            ("sigmasq", k, params.sigmasq.len()),
            ("alpha", k - 1, params.alpha.len()),
            ("assignment components", k, assignment.n_components()),
            ("assignment length", self.observations.len(), assignment.len()),
        ] {
            if expected != actual {
                return Err(MixtureError::DimensionMismatch {
                    name,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// `sum_j [0.5 n_j log(1/sigmasq_j) - 0.5 sum_i I_ij (y_i - mu_j)^2 / sigmasq_j]
    ///  + sum_{j<K-1} n_j log(alpha_j) + n_{K-1} log(1 - sum(alpha))`.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when `params` and `assignment` disagree on `K` or
    /// on the number of observations. `NumericalInstability` when a logarithm
    /// would be taken of a non-positive argument: a variance, a free weight,
    /// or the implied last weight.
    pub fn log_posterior(
        &self,
        params: &Parameters,
        assignment: &Assignment,
    ) -> Result<f64, MixtureError> {
        self.check_dims(params, assignment)?;
        let k = params.n_components();
        let stats = ComponentStats::new(&params.mu, assignment, self.observations);

        let mut res = 0.0;
        for j in 0..k {
            let s = params.sigmasq[j];
            if !(s > 0.0) {
                return Err(MixtureError::numerical("log of variance", Some(j), s));
            }
            res += 0.5 * stats.counts[j] * (1.0 / s).ln();
            res -= 0.5 * stats.resid_sq[j] / s;
        }
        for j in 0..k - 1 {
            let a = params.alpha[j];
            if !(a > 0.0) {
                return Err(MixtureError::numerical("log of mixing weight", Some(j), a));
            }
            res += stats.counts[j] * a.ln();
        }
        let tail = params.implied_tail();
        if !(tail > 0.0) {
            return Err(MixtureError::numerical(
                "log of implied mixing weight",
                Some(k - 1),
                tail,
            ));
        }
        res += stats.counts[k - 1] * tail.ln();
        Ok(res)
    }

    /// Gradients of the log-posterior at `params` for the configured [`GradientMode`].
    ///
    /// `sigmasq`: `-0.5 n_j / sigmasq_j + 0.5 sum_i I_ij (y_i - mu_j)^2 / sigmasq_j^2`.
    /// In `Literal` mode the `mu` gradient is `sum_i I_ij (y_i - mu_j) * mu_j / sigmasq_j`
    /// and the `alpha` gradient is `n_j / alpha_j - n_{K-1} / sum(alpha)`.
    /// `Analytic` drops the `mu_j` factor and divides the tail count by the
    /// implied weight `1 - sum(alpha)` instead.
    ///
    /// Values are not checked; a boundary state can produce infinities.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` as for [`Self::log_posterior`].
    pub fn gradients(
        &self,
        params: &Parameters,
        assignment: &Assignment,
    ) -> Result<Gradients, MixtureError> {
        self.check_dims(params, assignment)?;
        let k = params.n_components();
        let stats = ComponentStats::new(&params.mu, assignment, self.observations);
        let s = &params.sigmasq;

        let sigmasq = Array1::from_shape_fn(k, |j| {
            -0.5 * stats.counts[j] / s[j] + 0.5 * stats.resid_sq[j] / (s[j] * s[j])
        });
        let (mu, tail_denominator) = match self.mode {
            GradientMode::Literal => (
                Array1::from_shape_fn(k, |j| stats.resid[j] * params.mu[j] / s[j]),
                params.alpha.sum(),
            ),
            GradientMode::Analytic => (
                Array1::from_shape_fn(k, |j| stats.resid[j] / s[j]),
                params.implied_tail(),
            ),
        };
        let tail_count = stats.counts[k - 1];
        let alpha = Array1::from_shape_fn(k - 1, |j| {
            stats.counts[j] / params.alpha[j] - tail_count / tail_denominator
        });

        Ok(Gradients { mu, sigmasq, alpha })
    }
}

/// Boundary check run after every leapfrog position update.
///
/// Only components `0..K-1` are checked: each free weight must lie in `[0, 1]`
/// and the matching variance must be non-negative. The last variance and the
/// implied last weight are not examined.
pub fn is_valid(params: &Parameters) -> bool {
    let k = params.n_components();
    for j in 0..k - 1 {
        if !(0.0..=1.0).contains(&params.alpha[j]) {
            return false;
        }
        if params.sigmasq[j] < 0.0 {
            return false;
        }
    }
    true
}

/// Whether `params` lies where [`PosteriorEvaluator::log_posterior`] is defined.
pub fn in_support(params: &Parameters) -> bool {
    params.is_finite()
        && params.sigmasq.iter().all(|&s| s > 0.0)
        && params.alpha.iter().all(|&a| a > 0.0)
        && params.implied_tail() > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    fn fixture() -> (Observations, Assignment) {
        let data = Observations::new(vec![0.5, 1.5, 1.0, 4.0, 6.0]).unwrap();
        let assignment = Assignment::from_labels(vec![0, 0, 0, 1, 1], 2).unwrap();
        (data, assignment)
    }

    #[test]
    fn log_posterior_matches_hand_computation() {
        let (data, assignment) = fixture();
        let params = Parameters::new(array![1.0, 5.0], array![0.5, 2.0], array![0.4]);
        let lp = PosteriorEvaluator::new(&data)
            .log_posterior(&params, &assignment)
            .unwrap();
        // Component 0: residuals -0.5, 0.5, 0 ; component 1: -1, 1.
        let expected = 0.5 * 3.0 * (2.0f64).ln() - 0.5 * 0.5 / 0.5
            + 0.5 * 2.0 * (0.5f64).ln()
            - 0.5 * 2.0 / 2.0
            + 3.0 * 0.4f64.ln()
            + 2.0 * 0.6f64.ln();
        assert_relative_eq!(lp, expected, epsilon = 1e-12);
    }

    #[test]
    fn log_posterior_rejects_non_positive_tail() {
        let (data, assignment) = fixture();
        let params = Parameters::new(array![1.0, 5.0], array![0.5, 2.0], array![1.0]);
        let err = PosteriorEvaluator::new(&data)
            .log_posterior(&params, &assignment)
            .unwrap_err();
        assert!(matches!(
            err,
            MixtureError::NumericalInstability {
                component: Some(1),
                ..
            }
        ));
    }

    #[test]
    fn literal_gradients_match_formulas() {
        let (data, assignment) = fixture();
        let params = Parameters::new(array![2.0, 5.0], array![0.5, 2.0], array![0.4]);
        let g = PosteriorEvaluator::new(&data).gradients(&params, &assignment).unwrap();
        // sum(y - mu) over component 0 = -3, component 1 = 0.
        assert_abs_diff_eq!(g.mu, array![-3.0 * 2.0 / 0.5, 0.0], epsilon = 1e-12);
        // sum (y-mu)^2: component 0 = 2.25 + 0.25 + 1 = 3.5, component 1 = 2.
        assert_abs_diff_eq!(
            g.sigmasq,
            array![-1.5 / 0.5 + 0.5 * 3.5 / 0.25, -1.0 / 2.0 + 0.5 * 2.0 / 4.0],
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(g.alpha, array![3.0 / 0.4 - 2.0 / 0.4], epsilon = 1e-12);
    }

    #[test]
    fn analytic_gradients_match_finite_differences() {
        let (data, assignment) = fixture();
        let eval = PosteriorEvaluator::new(&data).with_gradient_mode(GradientMode::Analytic);
        let params = Parameters::new(array![1.3, 4.6], array![0.7, 1.9], array![0.45]);
        let g = eval.gradients(&params, &assignment).unwrap();
        let h = 1e-6;
        let lp = |p: &Parameters| eval.log_posterior(p, &assignment).unwrap();

        for j in 0..2 {
            let mut up = params.clone();
            let mut down = params.clone();
            up.mu[j] += h;
            down.mu[j] -= h;
            assert_abs_diff_eq!(g.mu[j], (lp(&up) - lp(&down)) / (2.0 * h), epsilon = 1e-5);

            let mut up = params.clone();
            let mut down = params.clone();
            up.sigmasq[j] += h;
            down.sigmasq[j] -= h;
            assert_abs_diff_eq!(g.sigmasq[j], (lp(&up) - lp(&down)) / (2.0 * h), epsilon = 1e-5);
        }
        let mut up = params.clone();
        let mut down = params.clone();
        up.alpha[0] += h;
        down.alpha[0] -= h;
        assert_abs_diff_eq!(g.alpha[0], (lp(&up) - lp(&down)) / (2.0 * h), epsilon = 1e-5);
    }

    #[test]
    fn mismatched_assignment_is_dimension_error() {
        let (data, _) = fixture();
        let eval = PosteriorEvaluator::new(&data);
        let params = Parameters::new(array![1.0, 5.0], array![0.5, 2.0], array![0.4]);

        let three = Assignment::from_labels(vec![0, 0, 2, 1, 1], 3).unwrap();
        let expected = MixtureError::DimensionMismatch {
            name: "assignment components",
            expected: 2,
            actual: 3,
        };
        assert_eq!(eval.log_posterior(&params, &three).unwrap_err(), expected);
        assert_eq!(eval.gradients(&params, &three).unwrap_err(), expected);

        let short = Assignment::from_labels(vec![0, 0, 1], 2).unwrap();
        assert_eq!(
            eval.gradients(&params, &short).unwrap_err(),
            MixtureError::DimensionMismatch {
                name: "assignment length",
                expected: 5,
                actual: 3
            }
        );

        let full_alpha = Parameters::new(array![1.0, 5.0], array![0.5, 2.0], array![0.4, 0.6]);
        let (_, assignment) = fixture();
        assert!(matches!(
            eval.log_posterior(&full_alpha, &assignment),
            Err(MixtureError::DimensionMismatch { name: "alpha", .. })
        ));
    }

    #[test]
    fn validity_checks_only_leading_components() {
        let mu = array![0.0, 0.0];
        assert!(!is_valid(&Parameters::new(mu.clone(), array![1.0, 1.0], array![1.5])));
        assert!(is_valid(&Parameters::new(mu.clone(), array![1.0, 1.0], array![0.5])));
        assert!(!is_valid(&Parameters::new(mu.clone(), array![-0.1, 1.0], array![0.5])));
        assert!(!is_valid(&Parameters::new(mu.clone(), array![1.0, 1.0], array![-0.5])));
        // The last variance is never examined.
        assert!(is_valid(&Parameters::new(mu.clone(), array![1.0, -3.0], array![0.5])));
        assert!(!in_support(&Parameters::new(mu, array![1.0, -3.0], array![0.5])));
    }

    #[test]
    fn validity_ignores_implied_tail() {
        let params = Parameters::new(
            array![0.0, 0.0, 0.0],
            array![1.0, 1.0, 1.0],
            array![0.8, 0.8],
        );
        assert!(is_valid(&params));
        assert!(!in_support(&params));
    }
}
