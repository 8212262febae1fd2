pub mod assignment;
pub mod config;
pub mod core;
pub mod distributions;
pub mod error;
pub mod gibbs;
pub mod hmc;
pub mod io;
pub mod model;
pub mod posterior;
pub mod stats;

pub use config::{GradientMode, HmcConfig, MixtureConfig, RunConfig, SamplerKind};
pub use core::{run_chain, run_chain_with_progress, MixtureSampler, Trace};
pub use error::{ChainError, MixtureError};
pub use gibbs::{GibbsSampler, VariancePrior};
pub use hmc::HmcSampler;
pub use model::{NormalMixtureModel, Observations, Parameters};
