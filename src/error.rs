//! Error types shared by the samplers and the chain driver.

use thiserror::Error;

use crate::core::Trace;

/// Everything that can go wrong while building a model or drawing from it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MixtureError {
    #[error("observation sequence is empty")]
    EmptyObservations,
    #[error("observation {index} is not finite ({value})")]
    NonFiniteObservation { index: usize, value: f64 },
    #[error("a mixture needs at least 2 components, got {0}")]
    TooFewComponents(usize),
    #[error("`{name}` has length {actual}, expected {expected}")]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("step size must be positive and finite, got {0}")]
    InvalidStepSize(f64),
    #[error("mass scale for `{block}` must be positive and finite, got {value}")]
    InvalidMassScale { block: &'static str, value: f64 },
    #[error("chain length must be positive")]
    InvalidChainLength,
    #[error("assignment sampler needs at least one attempt")]
    InvalidRetryBound,
    #[error("variance prior needs shape >= 0 and rate >= 0, got shape={shape}, rate={rate}")]
    InvalidVariancePrior { shape: f64, rate: f64 },
    #[error(
        "no assignment with at least 2 members per component after {attempts} attempts \
         (last occupancy {counts:?})"
    )]
    DegenerateComponent { counts: Vec<usize>, attempts: usize },
    #[error("numerical instability in {quantity}{}: got {value}", component_suffix(.component))]
    NumericalInstability {
        quantity: &'static str,
        component: Option<usize>,
        value: f64,
    },
}

fn component_suffix(component: &Option<usize>) -> String {
    match component {
        Some(j) => format!(" (component {j})"),
        None => String::new(),
    }
}

impl MixtureError {
    pub(crate) fn numerical(quantity: &'static str, component: Option<usize>, value: f64) -> Self {
        Self::NumericalInstability {
            quantity,
            component,
            value,
        }
    }
}

/// A failed run: the error, the iteration it surfaced in, and the snapshots
/// recorded before it.
#[derive(Debug, Error)]
#[error("sampling failed at iteration {iteration}: {source}")]
pub struct ChainError {
    pub iteration: usize,
    #[source]
    pub source: MixtureError,
    pub trace: Trace,
}
