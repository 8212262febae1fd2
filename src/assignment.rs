//! Latent component assignment: which component owns each observation.
//!
//! Every observation gets a categorical draw over components with weights
//! `alpha_j * N(y_i; mu_j, sigmasq_j)`. The whole assignment is redrawn until
//! each component owns at least two observations, since the Gibbs variance
//! update needs a sample variance per component. The number of redraws is
//! bounded; running out of attempts is a [`MixtureError::DegenerateComponent`].

use log::warn;
use ndarray::{Array1, Array2};
use ndarray_stats::QuantileExt;
use rand::Rng;

use crate::distributions::{normal_log_pdf, Categorical};
use crate::error::MixtureError;
use crate::model::{Observations, Parameters};

/// Smallest occupancy a component may have after a draw.
pub const MIN_OCCUPANCY: usize = 2;

/// A one-hot assignment of `N` observations to `K` components, stored as labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    labels: Array1<usize>,
    counts: Array1<usize>,
}

impl Assignment {
    /// Builds an assignment from per-observation component labels.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when a label is not below `n_components`.
    pub fn from_labels(labels: Vec<usize>, n_components: usize) -> Result<Self, MixtureError> {
        let mut counts = Array1::zeros(n_components);
        for &label in &labels {
            if label >= n_components {
                return Err(MixtureError::DimensionMismatch {
                    name: "assignment label",
                    expected: n_components,
                    actual: label + 1,
                });
            }
            counts[label] += 1;
        }
        Ok(Self {
            labels: Array1::from(labels),
            counts,
        })
    }

    pub fn labels(&self) -> &Array1<usize> {
        &self.labels
    }

    /// Column sums `n_j` of the indicator matrix.
    pub fn counts(&self) -> &Array1<usize> {
        &self.counts
    }

    pub fn count(&self, component: usize) -> usize {
        self.counts[component]
    }

    pub fn n_components(&self) -> usize {
        self.counts.len()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Observations owned by `component`, in their original order.
    pub fn members<'a>(
        &'a self,
        component: usize,
        observations: &'a Observations,
    ) -> impl Iterator<Item = f64> + 'a {
        self.labels
            .iter()
            .zip(observations.iter())
            .filter(move |(&label, _)| label == component)
            .map(|(_, &y)| y)
    }

    /// The `N x K` indicator matrix `I`, each row one-hot.
    pub fn indicator_matrix(&self) -> Array2<u8> {
        let mut ind = Array2::zeros((self.len(), self.n_components()));
        for (i, &label) in self.labels.iter().enumerate() {
            ind[(i, label)] = 1;
        }
        ind
    }

    /// Whether every component owns at least [`MIN_OCCUPANCY`] observations.
    pub fn is_occupied(&self) -> bool {
        self.counts
            .min()
            .map_or(false, |&smallest| smallest >= MIN_OCCUPANCY)
    }
}

/// Draws latent assignments with a bounded number of whole-matrix redraws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentSampler {
    pub max_attempts: usize,
}

impl AssignmentSampler {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    /// Per-observation categorical distributions over components.
    ///
    /// # Errors
    ///
    /// `NumericalInstability` for a negative or non-finite mixing weight, a
    /// non-positive variance, or an observation that no component can explain.
    pub fn responsibilities(
        &self,
        params: &Parameters,
        observations: &Observations,
    ) -> Result<Vec<Categorical>, MixtureError> {
        let weights = params.mixing_weights();
        for (j, &a) in weights.iter().enumerate() {
            if !(a >= 0.0 && a.is_finite()) {
                return Err(MixtureError::numerical("mixing weight", Some(j), a));
            }
        }
        for (j, &s) in params.sigmasq.iter().enumerate() {
            if !(s > 0.0 && s.is_finite()) {
                return Err(MixtureError::numerical("variance", Some(j), s));
            }
        }
        let log_alpha = weights.mapv(f64::ln);
        let sigma = params.sigmasq.mapv(f64::sqrt);

        observations
            .iter()
            .map(|&y| {
                let log_weights: Vec<f64> = (0..params.n_components())
                    .map(|j| log_alpha[j] + normal_log_pdf(y, params.mu[j], sigma[j]))
                    .collect();
                Categorical::from_log_weights(&log_weights)
                    .ok_or_else(|| MixtureError::numerical("responsibility normalizer", None, y))
            })
            .collect()
    }

    /// Draws an assignment in which every component owns at least two observations.
    ///
    /// # Errors
    ///
    /// `DegenerateComponent` once `max_attempts` full draws all leave some
    /// component under-occupied, plus any error of [`Self::responsibilities`].
    pub fn sample<R: Rng + ?Sized>(
        &self,
        params: &Parameters,
        observations: &Observations,
        rng: &mut R,
    ) -> Result<Assignment, MixtureError> {
        let rows = self.responsibilities(params, observations)?;
        let k = params.n_components();
        let mut counts = vec![0; k];

        for attempt in 1..=self.max_attempts {
            let labels: Vec<usize> = rows.iter().map(|row| row.sample(rng)).collect();
            let assignment = Assignment::from_labels(labels, k)?;
            if assignment.is_occupied() {
                if attempt > 1 {
                    warn!("assignment needed {attempt} draws to occupy every component");
                }
                return Ok(assignment);
            }
            counts = assignment.counts().to_vec();
        }

        Err(MixtureError::DegenerateComponent {
            counts,
            attempts: self.max_attempts,
        })
    }
}
