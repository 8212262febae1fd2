//! Fits a two-component mixture to synthetic data with both samplers and prints
//! posterior means over the second half of each chain.

use mixture_mcmc::config::{HmcConfig, MixtureConfig};
use mixture_mcmc::core::run_chain_with_progress;
use mixture_mcmc::model::NormalMixtureModel;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    const N_PER_COMPONENT: usize = 150;
    const ITERATIONS: usize = 2_000;
    const SEED: u64 = 42;

    let mut rng = SmallRng::seed_from_u64(SEED);
    let left = Normal::new(-2.0, 0.7)?;
    let right = Normal::new(3.0, 1.2)?;
    let mut data: Vec<f64> = left.sample_iter(&mut rng).take(N_PER_COMPONENT).collect();
    data.extend(right.sample_iter(&mut rng).take(N_PER_COMPONENT));

    let config = MixtureConfig::new(2)
        .with_mu(vec![-1.0, 1.0])
        .with_sigmasq(vec![1.0, 1.0])
        .with_alpha(vec![0.5, 0.5]);
    let model = NormalMixtureModel::new(data, config)?;

    let mut gibbs = model.gibbs_sampler();
    let trace = run_chain_with_progress(&mut gibbs, ITERATIONS, None, &mut rng)?;
    if let Some(mean) = trace.mean_from(trace.len() / 2) {
        println!("Gibbs: {:?}", trace.column_names());
        println!("       {:.3}", mean);
    }

    let mut hmc = model.hmc_sampler(HmcConfig::new(10, 0.005))?;
    let trace = run_chain_with_progress(&mut hmc, ITERATIONS, None, &mut rng)?;
    if let Some(mean) = trace.mean_from(trace.len() / 2) {
        println!("HMC:   {:?}", trace.column_names());
        println!("       {:.3}", mean);
    }
    println!("HMC acceptance rate: {:.2}", hmc.acceptance_rate());

    #[cfg(feature = "csv")]
    mixture_mcmc::io::csv::save_csv(&trace, "/tmp/mixture_hmc_trace.csv")?;

    Ok(())
}
