//! The sampler controller.
//!
//! [`MCMC`] owns the walker state, the chain and the derived results of one fit.
//! It is constructed once per orbit model and can be run any number of times;
//! every run continues from the current walker positions and appends to the chain.
//!
//! # Example
//!
//! ```
//! use orbitfit_mcmc::example_models::GaussianOrbitModel;
//! use orbitfit_mcmc::{SamplerConfig, MCMC};
//!
//! let config = SamplerConfig::new(0, 20, 2).with_seed(42);
//! let mut sampler = MCMC::from_config(GaussianOrbitModel::default(), config).unwrap();
//!
//! let summary = sampler.run_sampler(50, 10, false).unwrap();
//! assert_eq!(summary.steps_appended, 50);
//! assert_eq!(sampler.results().post.nrows(), 20 * 50);
//!
//! sampler.chop_chains(10, 0).unwrap();
//! assert_eq!(sampler.chain_shape(), vec![20, 40, 8]);
//! ```

use crate::chain::ChainStore;
use crate::config::SamplerConfig;
use crate::diagnostics::{self, ExamineOptions, TraceFigure};
use crate::error::ConvergenceWarning;
use crate::mode::{evaluate_all, SamplerMode, Sweep};
use crate::model::OrbitModel;
use crate::results::Results;
use crate::rng::{self, Purpose};
use crate::stretch::StretchMove;
use crate::tempering::TemperatureLadder;
use crate::walkers::{acceptance_fraction, WalkerState};
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayD};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Information about sampling progress.
///
/// Passed to progress callbacks after every generation, burn-in included.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Generation number within this run (0-indexed, burn-in first)
    pub iteration: usize,

    /// Total number of generations in this run
    pub total: usize,

    /// Whether this generation was burn-in
    pub burn_in: bool,

    /// Generations completed over the sampler's lifetime
    pub generation: u64,

    /// Mean cold-chain acceptance rate over this run so far
    pub acceptance_rate: f64,

    /// Mean cold-chain log-likelihood at the current positions
    pub mean_ln_like: f64,
}

/// Outcome of a call to [`MCMC::run_sampler`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Steps added to the chain (fewer than the sampling generations when thinning)
    pub steps_appended: usize,

    /// Burn-in generations run and discarded
    pub burn_steps: usize,

    /// Generations completed over the sampler's lifetime after this run
    pub generation: u64,

    /// Cold-chain acceptance fraction of each walker during this run
    pub acceptance_fraction: Array1<f64>,

    /// Fraction of accepted swaps between rungs `i` and `i + 1` during this run
    /// (empty in ensemble mode)
    pub swap_acceptance: Vec<f64>,

    /// Set when every cold walker barely moved during this run
    pub convergence_warning: Option<ConvergenceWarning>,

    /// Periodic checkpoints successfully written during this run
    pub checkpoints_written: usize,

    /// Trace figures, when requested
    pub figures: Option<Vec<TraceFigure>>,
}

impl RunSummary {
    pub fn mean_acceptance(&self) -> f64 {
        self.acceptance_fraction.mean().unwrap_or(0.0)
    }
}

/// Everything needed to resume a sampler.
///
/// The model itself is not stored; it is supplied again on restore and must expose
/// the same parameter labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub config: SamplerConfig,
    pub seed: u64,
    pub mode: SamplerMode,
    pub state: WalkerState,
    pub chain: ChainStore,
    pub generation: u64,
}

impl Checkpoint {
    /// Save the checkpoint to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a checkpoint written by [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

/// Affine-invariant ensemble / parallel-tempering sampler over an orbit model.
pub struct MCMC<M: OrbitModel> {
    model: M,
    config: SamplerConfig,
    seed: u64,
    mode: SamplerMode,
    stretch: StretchMove,
    pool: ThreadPool,
    state: WalkerState,
    chain: ChainStore,
    results: Results,
    generation: u64,
}

impl<M: OrbitModel> MCMC<M> {
    /// Create a sampler with default settings apart from the mode, walker and
    /// thread counts.
    ///
    /// `num_temps` of 0 or 1 selects the ensemble sampler; larger values select
    /// parallel tempering with that many rungs.
    pub fn new(model: M, num_temps: usize, num_walkers: usize, num_threads: usize) -> Result<Self> {
        Self::from_config(model, SamplerConfig::new(num_temps, num_walkers, num_threads))
    }

    /// Create a sampler from a full configuration.
    ///
    /// Walkers are placed according to `config.walker_init` and evaluated once.
    /// Walkers starting outside the prior support or at zero likelihood are
    /// reported but not rejected; they are pulled in by the first accepted moves.
    pub fn from_config(model: M, config: SamplerConfig) -> Result<Self> {
        let n_params = model.n_params();
        config.validate(n_params)?;

        let seed = config.seed.unwrap_or_else(rand::random);
        let stretch = StretchMove::new(config.stretch_scale)?;
        let mode = if config.is_tempered() {
            SamplerMode::ParallelTempering(TemperatureLadder::new(
                config.num_temps,
                n_params,
                config.temperature_step,
            )?)
        } else {
            SamplerMode::Ensemble
        };
        let pool = build_pool(config.num_threads)?;

        let mut init_rng = rng::stream(seed, Purpose::Initialisation, 0, 0);
        let positions = config.walker_init.initialize(
            mode.n_rungs(),
            config.num_walkers,
            &model,
            &mut init_rng,
        )?;
        let mut state = WalkerState::new(positions)?;
        evaluate_all(&model, &pool, &mut state);

        let invalid = state.n_invalid(0);
        if invalid > 0 {
            warn!(
                invalid,
                n_walkers = config.num_walkers,
                "Some walkers start outside the prior support or at zero likelihood"
            );
        }

        let labels = model.param_labels().to_vec();
        let chain = ChainStore::new(
            labels.clone(),
            mode.n_rungs(),
            config.num_walkers,
            mode.is_tempered(),
            config.thin,
        );

        info!(
            n_params,
            n_walkers = config.num_walkers,
            n_rungs = mode.n_rungs(),
            n_threads = config.num_threads,
            seed,
            "Created sampler"
        );

        Ok(Self {
            model,
            config,
            seed,
            mode,
            stretch,
            pool,
            state,
            chain,
            results: Results::empty(labels),
            generation: 0,
        })
    }

    /// Restore a sampler from a checkpoint.
    ///
    /// Fails with [`Error::Configuration`] if `model` does not expose the labels the
    /// checkpoint was written with, or if the stored configuration, mode, walker
    /// state and chain disagree on walker, rung or parameter counts.
    pub fn from_checkpoint(model: M, checkpoint: Checkpoint) -> Result<Self> {
        validate_checkpoint(&model, &checkpoint)?;

        let stretch = StretchMove::new(checkpoint.config.stretch_scale)?;
        let pool = build_pool(checkpoint.config.num_threads)?;
        let results = Results::from_chain(&checkpoint.chain);

        info!(
            generation = checkpoint.generation,
            n_steps = checkpoint.chain.len(),
            "Restored sampler from checkpoint"
        );

        Ok(Self {
            model,
            config: checkpoint.config,
            seed: checkpoint.seed,
            mode: checkpoint.mode,
            stretch,
            pool,
            state: checkpoint.state,
            chain: checkpoint.chain,
            results,
            generation: checkpoint.generation,
        })
    }

    /// Snapshot the resumable state of the sampler.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            config: self.config.clone(),
            seed: self.seed,
            mode: self.mode.clone(),
            state: self.state.clone(),
            chain: self.chain.clone(),
            generation: self.generation,
        }
    }

    pub fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.checkpoint().save(path)
    }

    /// Run `burn_steps` discarded generations followed by `n_steps` generations
    /// appended to the chain.
    ///
    /// Sampling continues from the current walker positions. When
    /// `examine_chains` is set, trace figures of every parameter are returned in
    /// the summary. A run of zero generations changes nothing.
    pub fn run_sampler(
        &mut self,
        n_steps: usize,
        burn_steps: usize,
        examine_chains: bool,
    ) -> Result<RunSummary> {
        self.run_sampler_with_progress(
            n_steps,
            burn_steps,
            examine_chains,
            None::<fn(&ProgressInfo)>,
        )
    }

    /// [`run_sampler`](Self::run_sampler) with a callback invoked after every generation.
    pub fn run_sampler_with_progress<F>(
        &mut self,
        n_steps: usize,
        burn_steps: usize,
        examine_chains: bool,
        mut progress_callback: Option<F>,
    ) -> Result<RunSummary>
    where
        F: FnMut(&ProgressInfo),
    {
        let total = n_steps.checked_add(burn_steps).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "n_steps ({}) + burn_steps ({}) overflows",
                n_steps, burn_steps
            ))
        })?;

        info!(n_steps, burn_steps, generation = self.generation, "Starting run");

        let accepted_before = self.state.n_accepted.row(0).to_owned();
        let proposed_before = self.state.n_proposed.row(0).to_owned();
        let mut swaps_accepted = vec![0usize; self.mode.n_rungs() - 1];
        let mut checkpoints_written = 0;
        let mut steps_appended = 0;

        for iteration in 0..total {
            let burn_in = iteration < burn_steps;
            let outcome = {
                let sweep = Sweep {
                    model: &self.model,
                    pool: &self.pool,
                    stretch: self.stretch,
                    seed: self.seed,
                };
                self.mode.advance(&sweep, &mut self.state, self.generation)
            };
            self.generation += 1;

            for (sum, accepted) in swaps_accepted.iter_mut().zip(&outcome.swaps_accepted) {
                *sum += accepted;
            }

            if burn_in {
                if iteration + 1 == burn_steps {
                    debug!(burn_steps, generation = self.generation, "Burn-in complete");
                }
            } else if self.chain.push(&self.state.positions, &self.state.ln_like) {
                steps_appended += 1;
            }

            if let Some(ref mut callback) = progress_callback {
                let info = ProgressInfo {
                    iteration,
                    total,
                    burn_in,
                    generation: self.generation,
                    acceptance_rate: self
                        .run_acceptance(&accepted_before, &proposed_before)
                        .mean()
                        .unwrap_or(0.0),
                    mean_ln_like: self.state.ln_like.row(0).mean().unwrap_or(f64::NEG_INFINITY),
                };
                callback(&info);
            }

            if self.checkpoint_due() && self.write_periodic_checkpoint() {
                checkpoints_written += 1;
            }
        }

        self.results = Results::from_chain(&self.chain);

        let acceptance = self.run_acceptance(&accepted_before, &proposed_before);
        let convergence_warning = if total > 0 {
            self.check_acceptance(&acceptance)
        } else {
            None
        };

        let swap_acceptance = swaps_accepted
            .iter()
            .map(|&n| {
                if total > 0 {
                    n as f64 / (total * self.state.n_walkers()) as f64
                } else {
                    0.0
                }
            })
            .collect();

        let figures = if examine_chains {
            Some(self.examine_chains(&ExamineOptions::default())?)
        } else {
            None
        };

        info!(
            generation = self.generation,
            chain_length = self.chain.len(),
            mean_acceptance = acceptance.mean().unwrap_or(0.0),
            "Run complete"
        );

        Ok(RunSummary {
            steps_appended,
            burn_steps,
            generation: self.generation,
            acceptance_fraction: acceptance,
            swap_acceptance,
            convergence_warning,
            checkpoints_written,
            figures,
        })
    }

    /// Cold-chain acceptance since the given counter snapshot.
    fn run_acceptance(
        &self,
        accepted_before: &Array1<usize>,
        proposed_before: &Array1<usize>,
    ) -> Array1<f64> {
        acceptance_fraction(
            &self.state.n_accepted.row(0) - accepted_before,
            &self.state.n_proposed.row(0) - proposed_before,
        )
    }

    fn check_acceptance(&self, acceptance: &Array1<f64>) -> Option<ConvergenceWarning> {
        let threshold = self.config.min_acceptance_fraction;
        let max_acceptance = acceptance.iter().copied().fold(0.0, f64::max);

        if max_acceptance < threshold {
            let warning = ConvergenceWarning {
                n_walkers: acceptance.len(),
                threshold,
                max_acceptance,
            };
            warn!("{}", warning);
            Some(warning)
        } else {
            None
        }
    }

    fn checkpoint_due(&self) -> bool {
        let every = self.config.checkpoint_every as u64;
        every > 0 && self.generation % every == 0
    }

    /// Checkpoint failures do not abort a run.
    fn write_periodic_checkpoint(&self) -> bool {
        let Some(path) = &self.config.checkpoint_path else {
            return false;
        };
        match self.save_checkpoint(path) {
            Ok(()) => {
                debug!(generation = self.generation, path = %path.display(), "Wrote checkpoint");
                true
            }
            Err(e) => {
                warn!(
                    generation = self.generation,
                    path = %path.display(),
                    error = %e,
                    "Failed to write checkpoint"
                );
                false
            }
        }
    }

    /// Permanently discard the first `burn` and the last `trim` stored steps.
    ///
    /// The results are rebuilt from the remaining chain. Fails with
    /// [`Error::InvalidArgument`], leaving everything unchanged, if nothing would
    /// be removed or no steps would remain.
    pub fn chop_chains(&mut self, burn: usize, trim: usize) -> Result<()> {
        let before = self.chain.len();
        self.chain.chop(burn, trim)?;
        self.results = Results::from_chain(&self.chain);

        info!(burn, trim, before, after = self.chain.len(), "Chopped chains");
        Ok(())
    }

    /// Build trace figures of the stored chain. Never modifies the sampler.
    pub fn examine_chains(&self, options: &ExamineOptions) -> Result<Vec<TraceFigure>> {
        let mut rng = rng::stream(self.seed, Purpose::Diagnostics, self.generation, 0);
        diagnostics::examine(&self.chain, options, &mut rng)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Seed of every random stream used by this sampler.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn mode(&self) -> &SamplerMode {
        &self.mode
    }

    pub fn is_tempered(&self) -> bool {
        self.mode.is_tempered()
    }

    pub fn param_labels(&self) -> &[String] {
        self.chain.param_labels()
    }

    pub fn n_walkers(&self) -> usize {
        self.state.n_walkers()
    }

    /// Generations completed over the sampler's lifetime, burn-in included.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The chain tensor: (walker, step, parameter) in ensemble mode, or
    /// (temperature, walker, step, parameter) with parallel tempering.
    pub fn chain(&self) -> ArrayD<f64> {
        self.chain.chain()
    }

    pub fn chain_shape(&self) -> Vec<usize> {
        self.chain.shape()
    }

    /// Log-likelihood of every stored step, indexed like [`chain`](Self::chain).
    pub fn ln_like_chain(&self) -> ArrayD<f64> {
        self.chain.ln_like()
    }

    pub fn chain_store(&self) -> &ChainStore {
        &self.chain
    }

    pub fn results(&self) -> &Results {
        &self.results
    }

    /// Current cold-chain walker positions: shape (n_walkers, n_params).
    pub fn current_positions(&self) -> Array2<f64> {
        self.state.positions.index_axis(ndarray::Axis(0), 0).to_owned()
    }

    /// Lifetime cold-chain acceptance fraction of each walker.
    pub fn acceptance_fraction(&self) -> Array1<f64> {
        self.state.acceptance_fraction(0)
    }
}

fn validate_checkpoint<M: OrbitModel>(model: &M, checkpoint: &Checkpoint) -> Result<()> {
    let Checkpoint {
        config,
        mode,
        state,
        chain,
        ..
    } = checkpoint;

    if model.param_labels() != chain.param_labels() {
        return Err(Error::Configuration(format!(
            "Model parameters {:?} do not match checkpoint parameters {:?}",
            model.param_labels(),
            chain.param_labels()
        )));
    }
    config.validate(model.n_params())?;

    let inconsistent = |what: &str| -> Result<()> {
        Err(Error::Configuration(format!("Checkpoint is inconsistent: {}", what)))
    };

    if config.is_tempered() != mode.is_tempered() || chain.is_tempered() != mode.is_tempered() {
        return inconsistent("tempering differs between configuration, mode and chain");
    }
    if config.is_tempered() && config.num_temps != mode.n_rungs() {
        return inconsistent("temperature count differs from the ladder");
    }

    let (n_rungs, n_walkers, n_params) = state.positions.dim();
    if n_rungs != mode.n_rungs() || chain.n_rungs() != mode.n_rungs() {
        return inconsistent("rung count differs from the mode");
    }
    if n_walkers != config.num_walkers || chain.n_walkers() != config.num_walkers {
        return inconsistent("walker count differs from the configuration");
    }
    if n_params != model.n_params() {
        return inconsistent("walker positions have the wrong parameter count");
    }

    let per_walker = (n_rungs, n_walkers);
    if state.ln_prior.dim() != per_walker
        || state.ln_like.dim() != per_walker
        || state.n_accepted.dim() != per_walker
        || state.n_proposed.dim() != per_walker
    {
        return inconsistent("walker densities or counters have the wrong shape");
    }
    if !chain.has_shape(n_rungs, n_walkers, n_params) {
        return inconsistent("stored chain steps have the wrong shape");
    }

    Ok(())
}

fn build_pool(num_threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| Error::Configuration(format!("Failed to build thread pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example_models::GaussianOrbitModel;

    fn sampler(num_temps: usize) -> MCMC<GaussianOrbitModel> {
        let config = SamplerConfig::new(num_temps, 20, 2).with_seed(5);
        MCMC::from_config(GaussianOrbitModel::default(), config).unwrap()
    }

    #[test]
    fn test_construction() {
        let sampler = sampler(0);
        assert!(!sampler.is_tempered());
        assert_eq!(sampler.seed(), 5);
        assert_eq!(sampler.generation(), 0);
        assert_eq!(sampler.chain_shape(), vec![20, 0, 8]);
        assert!(sampler.results().is_empty());
        assert_eq!(sampler.current_positions().dim(), (20, 8));
    }

    #[test]
    fn test_too_few_walkers() {
        let result = MCMC::new(GaussianOrbitModel::default(), 0, 15, 1);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_zero_step_run_is_noop() {
        let mut sampler = sampler(3);
        let positions = sampler.current_positions();

        let summary = sampler.run_sampler(0, 0, false).unwrap();

        assert_eq!(summary.steps_appended, 0);
        assert!(summary.convergence_warning.is_none());
        assert_eq!(sampler.generation(), 0);
        assert_eq!(sampler.chain_shape(), vec![3, 20, 0, 8]);
        assert_eq!(sampler.current_positions(), positions);
    }

    #[test]
    fn test_burn_in_is_not_stored() {
        let mut sampler = sampler(0);
        let summary = sampler.run_sampler(7, 5, false).unwrap();

        assert_eq!(summary.generation, 12);
        assert_eq!(sampler.chain_store().len(), 7);
        assert_eq!(sampler.results().n_samples(), 20 * 7);
        assert_eq!(summary.acceptance_fraction.len(), 20);
        assert!(summary.swap_acceptance.is_empty());
    }

    #[test]
    fn test_tempered_summary_reports_swaps() {
        let mut sampler = sampler(4);
        let summary = sampler.run_sampler(10, 0, false).unwrap();

        assert_eq!(summary.swap_acceptance.len(), 3);
        assert!(summary.swap_acceptance.iter().all(|&f| (0.0..=1.0).contains(&f)));
        assert_eq!(sampler.chain_shape(), vec![4, 20, 10, 8]);
    }

    #[test]
    fn test_progress_callback() {
        let mut sampler = sampler(0);
        let mut seen = Vec::new();

        sampler
            .run_sampler_with_progress(3, 2, false, Some(|info: &ProgressInfo| {
                seen.push((info.iteration, info.burn_in, info.generation));
            }))
            .unwrap();

        assert_eq!(
            seen,
            vec![(0, true, 1), (1, true, 2), (2, false, 3), (3, false, 4), (4, false, 5)]
        );
    }

    #[test]
    fn test_chop_updates_results() {
        let mut sampler = sampler(0);
        sampler.run_sampler(10, 0, false).unwrap();
        let last = sampler.chain().slice(ndarray::s![.., 9, ..]).to_owned();

        sampler.chop_chains(4, 0).unwrap();

        assert_eq!(sampler.chain_shape(), vec![20, 6, 8]);
        assert_eq!(sampler.results().n_samples(), 20 * 6);
        assert_eq!(sampler.chain().slice(ndarray::s![.., 5, ..]), last);
        assert!(sampler.chop_chains(6, 0).is_err());
        assert_eq!(sampler.chain_shape(), vec![20, 6, 8]);
    }

    #[test]
    fn test_examine_after_run() {
        let mut sampler = sampler(0);
        let summary = sampler.run_sampler(5, 0, true).unwrap();

        let figures = summary.figures.unwrap();
        assert_eq!(figures.len(), 8);
        assert_eq!(figures[0].values.dim(), (20, 5));
    }

    #[test]
    fn test_checkpoint_roundtrip_continues_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sampler.ckpt");

        let mut original = sampler(2);
        original.run_sampler(5, 0, false).unwrap();
        original.save_checkpoint(&path).unwrap();

        let checkpoint = Checkpoint::load(&path).unwrap();
        let mut restored =
            MCMC::from_checkpoint(GaussianOrbitModel::default(), checkpoint).unwrap();
        assert_eq!(restored.generation(), 5);
        assert_eq!(restored.results(), original.results());

        original.run_sampler(5, 0, false).unwrap();
        restored.run_sampler(5, 0, false).unwrap();
        assert_eq!(restored.chain(), original.chain());
    }

    #[test]
    fn test_periodic_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("periodic.ckpt");
        let config = SamplerConfig::new(0, 20, 1)
            .with_seed(1)
            .with_checkpoint(4, &path);
        let mut sampler = MCMC::from_config(GaussianOrbitModel::default(), config).unwrap();

        let summary = sampler.run_sampler(6, 3, false).unwrap();

        assert_eq!(summary.checkpoints_written, 2);
        let checkpoint = Checkpoint::load(&path).unwrap();
        assert_eq!(checkpoint.generation, 8);
        assert_eq!(checkpoint.chain.len(), 5);
    }
}
