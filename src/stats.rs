//! Running chain statistics and the sample moments the Gibbs sweep needs.

use ndarray::prelude::*;
use std::collections::VecDeque;

use crate::model::Parameters;

/// Number of recent iterations the acceptance estimate covers.
pub const ACCEPT_WINDOW: usize = 100;

/// Arithmetic mean, `None` for an empty sample.
pub fn sample_mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Bessel-corrected sample variance, `None` for fewer than two values.
pub fn sample_variance(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let mean = sample_mean(xs)?;
    let ss: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum();
    Some(ss / (xs.len() - 1) as f64)
}

/// Flattens a snapshot into `[mu.., sigmasq.., alpha..]`.
pub fn flatten(params: &Parameters) -> Array1<f64> {
    let mut out = Vec::with_capacity(params.mu.len() + params.sigmasq.len() + params.alpha.len());
    out.extend(params.mu.iter());
    out.extend(params.sigmasq.iter());
    out.extend(params.alpha.iter());
    Array1::from(out)
}

/// Tracks a windowed acceptance rate while a chain runs.
///
/// A step counts as accepted when the new snapshot differs from the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTracker {
    p_accept: f64,
    last_state: Parameters,
    accept_queue: VecDeque<bool>,
}

impl ChainTracker {
    pub fn new(initial_state: &Parameters) -> Self {
        Self {
            p_accept: 0.0,
            last_state: initial_state.clone(),
            accept_queue: VecDeque::with_capacity(ACCEPT_WINDOW + 1),
        }
    }

    pub fn step(&mut self, x: &Parameters) {
        let accepted = self.last_state != *x;
        self.accept_queue.push_back(accepted);
        if self.accept_queue.len() > ACCEPT_WINDOW {
            self.accept_queue.pop_front();
        }
        let n_accepted = self.accept_queue.iter().filter(|&&a| a).count();
        self.p_accept = n_accepted as f64 / self.accept_queue.len() as f64;
        self.last_state.clone_from(x);
    }

    pub fn p_accept(&self) -> f64 {
        self.p_accept
    }
}
