use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use ndarray::{s, Array1, Array2};
use rand::Rng;

use crate::error::{ChainError, MixtureError};
use crate::model::Parameters;
use crate::stats::{flatten, ChainTracker};

pub trait MixtureSampler {
    /// Does one outer iteration of the chain, returning the new current state.
    fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<&Parameters, MixtureError>;

    /// Get the current state without stepping.
    fn current_state(&self) -> &Parameters;

    /// Short label used in progress output.
    fn name(&self) -> &'static str {
        "chain"
    }
}

/// Append-only history of parameter snapshots, one per iteration.
///
/// Snapshots are copied in, so later iterations never alter earlier entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    snapshots: Vec<Parameters>,
}

impl Trace {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            snapshots: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, params: &Parameters) {
        self.snapshots.push(params.clone());
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn snapshots(&self) -> &[Parameters] {
        &self.snapshots
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameters> {
        self.snapshots.iter()
    }

    pub fn first(&self) -> Option<&Parameters> {
        self.snapshots.first()
    }

    pub fn last(&self) -> Option<&Parameters> {
        self.snapshots.last()
    }

    /// Column labels of [`Trace::to_array`]: `mu_j`, then `sigmasq_j`, then `alpha_j`.
    pub fn column_names(&self) -> Vec<String> {
        let Some(first) = self.first() else {
            return Vec::new();
        };
        let mut names = Vec::new();
        names.extend((0..first.mu.len()).map(|j| format!("mu_{j}")));
        names.extend((0..first.sigmasq.len()).map(|j| format!("sigmasq_{j}")));
        names.extend((0..first.alpha.len()).map(|j| format!("alpha_{j}")));
        names
    }

    /// One row per snapshot, laid out as in [`Trace::column_names`].
    pub fn to_array(&self) -> Array2<f64> {
        let n_cols = self.first().map_or(0, |p| flatten(p).len());
        let mut out = Array2::zeros((self.len(), n_cols));
        for (i, params) in self.snapshots.iter().enumerate() {
            out.row_mut(i).assign(&flatten(params));
        }
        out
    }

    /// The `mu_j` value of every snapshot.
    ///
    /// # Panics
    ///
    /// If `component` is not below the number of components in the snapshots.
    pub fn mu(&self, component: usize) -> Array1<f64> {
        self.snapshots.iter().map(|p| p.mu[component]).collect()
    }

    /// The `sigmasq_j` value of every snapshot.
    ///
    /// # Panics
    ///
    /// If `component` is not below the number of components in the snapshots.
    pub fn sigmasq(&self, component: usize) -> Array1<f64> {
        self.snapshots.iter().map(|p| p.sigmasq[component]).collect()
    }

    /// The `alpha_j` value of every snapshot.
    ///
    /// # Panics
    ///
    /// If `component` is not below the number of stored weights in the snapshots.
    pub fn alpha(&self, component: usize) -> Array1<f64> {
        self.snapshots.iter().map(|p| p.alpha[component]).collect()
    }

    /// Mean of every flattened column over snapshots `start..`, or `None` if that window is empty.
    pub fn mean_from(&self, start: usize) -> Option<Array1<f64>> {
        if start >= self.len() {
            return None;
        }
        self.to_array()
            .slice(s![start.., ..])
            .mean_axis(ndarray::Axis(0))
    }
}

/// Runs `n_steps` outer iterations and records the initial state plus one
/// snapshot per iteration.
///
/// A `time_budget` is checked before each iteration; once it is spent the
/// run stops early and returns the shorter trace.
pub fn run_chain<M, R>(
    chain: &mut M,
    n_steps: usize,
    time_budget: Option<Duration>,
    rng: &mut R,
) -> Result<Trace, ChainError>
where
    M: MixtureSampler,
    R: Rng + ?Sized,
{
    drive(chain, n_steps, time_budget, rng, |_| {})
}

pub fn run_chain_with_progress<M, R>(
    chain: &mut M,
    n_steps: usize,
    time_budget: Option<Duration>,
    rng: &mut R,
) -> Result<Trace, ChainError>
where
    M: MixtureSampler,
    R: Rng + ?Sized,
{
    let pb = ProgressBar::new(n_steps as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(chain.name());

    let mut tracker = ChainTracker::new(chain.current_state());
    let result = drive(chain, n_steps, time_budget, rng, |state| {
        tracker.step(state);
        pb.inc(1);
        pb.set_message(format!("p(accept)≈{:.2}", tracker.p_accept()));
    });
    match &result {
        Ok(_) => pb.finish_with_message("Done!"),
        Err(err) => pb.abandon_with_message(format!("failed at iteration {}", err.iteration)),
    }
    result
}

fn drive<M, R, F>(
    chain: &mut M,
    n_steps: usize,
    time_budget: Option<Duration>,
    rng: &mut R,
    mut on_step: F,
) -> Result<Trace, ChainError>
where
    M: MixtureSampler,
    R: Rng + ?Sized,
    F: FnMut(&Parameters),
{
    let started = Instant::now();
    let mut trace = Trace::with_capacity(n_steps + 1);
    trace.push(chain.current_state());

    for iteration in 1..=n_steps {
        if let Some(budget) = time_budget {
            if started.elapsed() >= budget {
                info!(
                    "{}: time budget of {budget:?} spent after {} iterations",
                    chain.name(),
                    iteration - 1
                );
                break;
            }
        }
        match chain.step(rng) {
            Ok(state) => {
                on_step(state);
                trace.push(state);
            }
            Err(source) => {
                return Err(ChainError {
                    iteration,
                    source,
                    trace,
                })
            }
        }
    }
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    /// Adds one to every mean each step and fails at a chosen iteration.
    struct Counter {
        state: Parameters,
        fail_at: Option<usize>,
        steps: usize,
    }

    impl Counter {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                state: Parameters::new(array![0.0, 10.0], array![1.0, 1.0], array![0.5]),
                fail_at,
                steps: 0,
            }
        }
    }

    impl MixtureSampler for Counter {
        fn step<R: Rng + ?Sized>(&mut self, _rng: &mut R) -> Result<&Parameters, MixtureError> {
            self.steps += 1;
            if Some(self.steps) == self.fail_at {
                return Err(MixtureError::numerical("test", Some(0), f64::NAN));
            }
            self.state.mu += 1.0;
            Ok(&self.state)
        }

        fn current_state(&self) -> &Parameters {
            &self.state
        }
    }

    #[test]
    fn trace_keeps_initial_state_and_copies() {
        let mut chain = Counter::new(None);
        let mut rng = SmallRng::seed_from_u64(0);
        let trace = run_chain(&mut chain, 5, None, &mut rng).unwrap();
        assert_eq!(trace.len(), 6);
        assert_eq!(trace.mu(0), array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        // Mutating the chain afterwards leaves the recorded history alone.
        chain.state.mu.fill(-1.0);
        assert_eq!(trace.last().unwrap().mu, array![5.0, 15.0]);
    }

    #[test]
    fn failure_preserves_partial_trace() {
        let mut chain = Counter::new(Some(3));
        let mut rng = SmallRng::seed_from_u64(0);
        let err = run_chain(&mut chain, 10, None, &mut rng).unwrap_err();
        assert_eq!(err.iteration, 3);
        assert_eq!(err.trace.len(), 3);
        assert!(matches!(err.source, MixtureError::NumericalInstability { .. }));
    }

    #[test]
    fn spent_time_budget_stops_between_iterations() {
        let mut chain = Counter::new(None);
        let mut rng = SmallRng::seed_from_u64(0);
        let trace = run_chain(&mut chain, 10, Some(Duration::ZERO), &mut rng).unwrap();
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn trace_array_layout_and_means() {
        let mut chain = Counter::new(None);
        let mut rng = SmallRng::seed_from_u64(0);
        let trace = run_chain_with_progress(&mut chain, 4, None, &mut rng).unwrap();
        assert_eq!(
            trace.column_names(),
            vec!["mu_0", "mu_1", "sigmasq_0", "sigmasq_1", "alpha_0"]
        );
        let arr = trace.to_array();
        assert_eq!(arr.dim(), (5, 5));
        assert_eq!(arr.row(2), array![2.0, 12.0, 1.0, 1.0, 0.5]);
        assert_abs_diff_eq!(trace.mean_from(3).unwrap(), array![3.5, 13.5, 1.0, 1.0, 0.5]);
        assert!(trace.mean_from(5).is_none());
    }

    #[test]
    #[should_panic]
    fn column_out_of_range_panics() {
        let mut chain = Counter::new(None);
        let mut rng = SmallRng::seed_from_u64(0);
        let trace = run_chain(&mut chain, 2, None, &mut rng).unwrap();
        trace.mu(2);
    }
}
