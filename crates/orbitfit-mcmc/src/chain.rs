//! Storage for the sampled chain.
//!
//! The chain is kept as one snapshot per stored generation rather than a single
//! growing tensor, so that appending a generation and chopping either end are cheap.
//! The conventional tensor layouts are materialised on request:
//!
//! - ensemble mode: `(walker, step, parameter)`
//! - parallel tempering: `(temperature, walker, step, parameter)`
//!
//! Only whole generations are ever stored.

use crate::{Error, Result};
use indexmap::IndexMap;
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Append-only history of walker positions and log-likelihoods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStore {
    /// Stored positions, one entry per step: shape (n_rungs, n_walkers, n_params)
    samples: Vec<Array3<f64>>,

    /// Stored log-likelihoods, one entry per step: shape (n_rungs, n_walkers)
    ln_likes: Vec<Array2<f64>>,

    /// Parameter labels in order
    param_labels: Vec<String>,

    n_rungs: usize,
    n_walkers: usize,

    /// Whether the tensor views carry a temperature axis
    tempered: bool,

    /// Thinning interval (store every thin-th generation)
    thin: usize,

    /// Total number of sampling generations offered to the store, including thinned ones
    total_iterations: usize,
}

impl ChainStore {
    /// Create a new empty chain.
    pub fn new(
        param_labels: Vec<String>,
        n_rungs: usize,
        n_walkers: usize,
        tempered: bool,
        thin: usize,
    ) -> Self {
        Self {
            samples: Vec::new(),
            ln_likes: Vec::new(),
            param_labels,
            n_rungs,
            n_walkers,
            tempered,
            thin: thin.max(1),
            total_iterations: 0,
        }
    }

    /// Offer one completed generation to the store.
    ///
    /// Returns `true` if the generation was stored, `false` if it was thinned out.
    pub fn push(&mut self, positions: &Array3<f64>, ln_like: &Array2<f64>) -> bool {
        self.total_iterations += 1;

        if self.total_iterations % self.thin == 0 {
            self.samples.push(positions.clone());
            self.ln_likes.push(ln_like.clone());
            true
        } else {
            false
        }
    }

    /// Number of stored steps.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn n_rungs(&self) -> usize {
        self.n_rungs
    }

    pub fn n_walkers(&self) -> usize {
        self.n_walkers
    }

    pub fn n_params(&self) -> usize {
        self.param_labels.len()
    }

    pub fn is_tempered(&self) -> bool {
        self.tempered
    }

    pub fn param_labels(&self) -> &[String] {
        &self.param_labels
    }

    pub fn thin(&self) -> usize {
        self.thin
    }

    /// Total number of sampling generations seen (including thinned ones).
    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    /// Whether every stored step has the given rung, walker and parameter counts.
    pub fn has_shape(&self, n_rungs: usize, n_walkers: usize, n_params: usize) -> bool {
        self.n_rungs == n_rungs
            && self.n_walkers == n_walkers
            && self.n_params() == n_params
            && self.ln_likes.len() == self.samples.len()
            && self.samples.iter().all(|s| s.dim() == (n_rungs, n_walkers, n_params))
            && self.ln_likes.iter().all(|l| l.dim() == (n_rungs, n_walkers))
    }

    /// Permanently discard the first `burn` and the last `trim` stored steps.
    ///
    /// Fails without modifying the chain if nothing would be removed or if no
    /// steps would remain.
    pub fn chop(&mut self, burn: usize, trim: usize) -> Result<()> {
        let len = self.len();
        let removed = burn.checked_add(trim).ok_or_else(|| {
            Error::InvalidArgument(format!("burn ({}) + trim ({}) overflows", burn, trim))
        })?;

        if removed == 0 {
            return Err(Error::InvalidArgument(
                "chop_chains requires burn + trim > 0".to_string(),
            ));
        }
        if removed >= len {
            return Err(Error::InvalidArgument(format!(
                "Cannot chop {} leading and {} trailing steps from a chain of length {}",
                burn, trim, len
            )));
        }

        self.samples.truncate(len - trim);
        self.ln_likes.truncate(len - trim);
        self.samples.drain(..burn);
        self.ln_likes.drain(..burn);

        Ok(())
    }

    /// The chain tensor.
    ///
    /// Shape (n_walkers, n_steps, n_params) in ensemble mode and
    /// (n_rungs, n_walkers, n_steps, n_params) in parallel-tempering mode.
    pub fn chain(&self) -> ArrayD<f64> {
        let (n_rungs, n_walkers, n_steps, n_params) =
            (self.n_rungs, self.n_walkers, self.len(), self.n_params());

        let full = Array4::from_shape_fn((n_rungs, n_walkers, n_steps, n_params), |(t, w, s, p)| {
            self.samples[s][[t, w, p]]
        });
        self.drop_temperature_axis(full.into_dyn())
    }

    /// The log-likelihood tensor, indexed like [`chain`](Self::chain) without the
    /// parameter axis.
    pub fn ln_like(&self) -> ArrayD<f64> {
        let full = Array3::from_shape_fn((self.n_rungs, self.n_walkers, self.len()), |(t, w, s)| {
            self.ln_likes[s][[t, w]]
        });
        self.drop_temperature_axis(full.into_dyn())
    }

    fn drop_temperature_axis(&self, full: ArrayD<f64>) -> ArrayD<f64> {
        if self.tempered {
            full
        } else {
            full.index_axis_move(Axis(0), 0)
        }
    }

    /// Shape of [`chain`](Self::chain) without materialising it.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.n_walkers, self.len(), self.n_params()];
        if self.tempered {
            shape.insert(0, self.n_rungs);
        }
        shape
    }

    /// Trace of one parameter on one rung: shape (walkers.len(), steps.len()).
    pub fn traces(
        &self,
        rung: usize,
        param: usize,
        walkers: &[usize],
        steps: Range<usize>,
    ) -> Array2<f64> {
        Array2::from_shape_fn((walkers.len(), steps.len()), |(i, s)| {
            self.samples[steps.start + s][[rung, walkers[i], param]]
        })
    }

    /// Flatten the cold chain into posterior samples and log-likelihoods.
    ///
    /// Samples are ordered walker-major, step-minor: sample `w * n_steps + s` is
    /// step `s` of walker `w`.
    pub fn flatten_cold(&self) -> (Array2<f64>, Array1<f64>) {
        let n_steps = self.len();
        let n_params = self.n_params();
        let n_samples = self.n_walkers * n_steps;

        let post = Array2::from_shape_fn((n_samples, n_params), |(i, p)| {
            self.samples[i % n_steps][[0, i / n_steps, p]]
        });
        let ln_like =
            Array1::from_shape_fn(n_samples, |i| self.ln_likes[i % n_steps][[0, i / n_steps]]);

        (post, ln_like)
    }

    /// Cold-chain samples of one parameter split per walker, skipping `discard` steps.
    fn walker_chains(&self, param: usize, discard: usize) -> Vec<Vec<f64>> {
        (0..self.n_walkers)
            .map(|w| {
                self.samples
                    .iter()
                    .skip(discard)
                    .map(|sample| sample[[0, w, param]])
                    .collect()
            })
            .collect()
    }

    /// Split R-hat of every parameter on the cold rung, after dropping the first
    /// `discard` stored steps.
    ///
    /// Each walker's remaining trace is cut into two halves of equal length `n`,
    /// giving twice as many chains as walkers. With `W` the mean within-half
    /// variance and `B` the variance of the half means, the statistic is
    /// `sqrt(((n - 1) W / n + B) / W)` (Gelman & Rubin, 1992). Fits whose values
    /// all sit near 1 have mixed; 1.1 is the usual cut-off passed to
    /// [`is_converged`](Self::is_converged).
    ///
    /// The map is empty while fewer than 4 steps survive the discard.
    pub fn r_hat(&self, discard: usize) -> IndexMap<String, f64> {
        let mut result = IndexMap::new();

        let n_keep = self.len().saturating_sub(discard);
        if n_keep < 4 {
            return result;
        }
        let n_split = n_keep / 2;

        for (param_idx, label) in self.param_labels.iter().enumerate() {
            let walker_chains = self.walker_chains(param_idx, discard);
            let split_chains: Vec<&[f64]> = walker_chains
                .iter()
                .flat_map(|chain| [&chain[..n_split], &chain[n_split..2 * n_split]])
                .collect();
            result.insert(label.clone(), split_r_hat(&split_chains));
        }

        result
    }

    /// Whether every cold-rung R-hat is finite and below `threshold`. Too short a
    /// chain never counts as converged.
    pub fn is_converged(&self, discard: usize, threshold: f64) -> bool {
        let r_hat = self.r_hat(discard);

        if r_hat.is_empty() {
            return false;
        }

        r_hat.values().all(|&v| v < threshold && v.is_finite())
    }

    /// Effective sample size of each parameter on the cold rung.
    ///
    /// ESS = N / (1 + 2 Σ ρ(k)), where N counts samples across all walkers and the
    /// walker-averaged autocorrelation ρ is summed until it first turns non-positive.
    ///
    /// Returns an empty map if fewer than 10 steps remain after `discard`.
    pub fn ess(&self, discard: usize) -> IndexMap<String, f64> {
        let n_total = (self.len().saturating_sub(discard) * self.n_walkers) as f64;
        self.integrated_autocorrelation(discard)
            .into_iter()
            .map(|(label, sum)| (label, n_total / (1.0 + 2.0 * sum)))
            .collect()
    }

    /// Compute the integrated autocorrelation time τ = 1 + 2 Σ ρ(k) for each parameter.
    ///
    /// Thinning by roughly τ yields nearly independent samples.
    pub fn autocorr_time(&self, discard: usize) -> IndexMap<String, f64> {
        self.integrated_autocorrelation(discard)
            .into_iter()
            .map(|(label, sum)| (label, 1.0 + 2.0 * sum))
            .collect()
    }

    /// Σ ρ(k) over the leading positive autocorrelations, per parameter.
    fn integrated_autocorrelation(&self, discard: usize) -> IndexMap<String, f64> {
        let mut result = IndexMap::new();

        let n_keep = self.len().saturating_sub(discard);
        if n_keep < 10 {
            // Need at least 10 samples for meaningful autocorrelation
            return result;
        }

        // Don't go beyond half the chain or 100 lags
        let max_lag = (n_keep / 2).min(100);

        for (param_idx, label) in self.param_labels.iter().enumerate() {
            let mut avg_autocorr = vec![0.0; max_lag];
            for chain in self.walker_chains(param_idx, discard) {
                for (avg, ac) in avg_autocorr
                    .iter_mut()
                    .zip(compute_autocorrelation(&chain, max_lag))
                {
                    *avg += ac / self.n_walkers as f64;
                }
            }

            let sum: f64 = avg_autocorr.iter().take_while(|&&ac| ac > 0.0).sum();
            result.insert(label.clone(), sum);
        }

        result
    }
}

/// Gelman-Rubin R-hat over equal-length chains.
fn split_r_hat(chains: &[&[f64]]) -> f64 {
    let n_chains = chains.len();
    let n = chains[0].len();

    let means: Vec<f64> = chains
        .iter()
        .map(|c| c.iter().sum::<f64>() / n as f64)
        .collect();
    let variances: Vec<f64> = chains
        .iter()
        .zip(&means)
        .map(|(c, m)| c.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1) as f64)
        .collect();

    // Within-chain variance (W)
    let w = variances.iter().sum::<f64>() / n_chains as f64;

    // Between-chain variance (B)
    let overall_mean = means.iter().sum::<f64>() / n_chains as f64;
    let b = n as f64 * means.iter().map(|m| (m - overall_mean).powi(2)).sum::<f64>()
        / (n_chains - 1) as f64;

    let var_plus = ((n - 1) as f64 * w + b) / n as f64;
    (var_plus / w).sqrt()
}

/// Autocorrelation of `chain` at lags 1..=max_lag.
fn compute_autocorrelation(chain: &[f64], max_lag: usize) -> Vec<f64> {
    let n = chain.len();
    let mean = chain.iter().sum::<f64>() / n as f64;

    // Lag-0 autocovariance
    let variance = chain.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n as f64;

    if variance == 0.0 {
        return vec![0.0; max_lag];
    }

    (1..=max_lag)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            let covariance = (0..n - lag)
                .map(|i| (chain[i] - mean) * (chain[i + lag] - mean))
                .sum::<f64>()
                / (n - lag) as f64;
            covariance / variance
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_distr::{Distribution as _, Normal};

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Ensemble chain with 2 walkers, 2 params; step s walker w holds [10w + s, -(10w + s)].
    fn small_chain(n_steps: usize) -> ChainStore {
        let mut chain = ChainStore::new(labels(&["x", "y"]), 1, 2, false, 1);
        for s in 0..n_steps {
            let positions = Array3::from_shape_fn((1, 2, 2), |(_, w, p)| {
                let v = (10 * w + s) as f64;
                if p == 0 {
                    v
                } else {
                    -v
                }
            });
            let ln_like = Array2::from_shape_fn((1, 2), |(_, w)| -((10 * w + s) as f64));
            chain.push(&positions, &ln_like);
        }
        chain
    }

    #[test]
    fn test_push_and_len() {
        let chain = small_chain(3);
        assert_eq!(chain.len(), 3);
        assert!(!chain.is_empty());
        assert_eq!(chain.total_iterations(), 3);
        assert_eq!(chain.param_labels(), &["x", "y"]);
    }

    #[test]
    fn test_thinning() {
        let mut chain = ChainStore::new(labels(&["x"]), 1, 2, false, 3);

        for i in 0..10 {
            let stored = chain.push(&Array3::zeros((1, 2, 1)), &Array2::zeros((1, 2)));
            assert_eq!(stored, (i + 1) % 3 == 0, "generation {} storage mismatch", i);
        }

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.total_iterations(), 10);
    }

    #[test]
    fn test_tensor_shapes() {
        let chain = small_chain(4);
        assert_eq!(chain.chain().shape(), &[2, 4, 2]);
        assert_eq!(chain.ln_like().shape(), &[2, 4]);
        assert_eq!(chain.shape(), vec![2, 4, 2]);
        assert_eq!(chain.chain()[[1, 3, 0]], 13.0);

        let mut tempered = ChainStore::new(labels(&["x"]), 3, 2, true, 1);
        tempered.push(&Array3::zeros((3, 2, 1)), &Array2::zeros((3, 2)));
        assert_eq!(tempered.chain().shape(), &[3, 2, 1, 1]);
        assert_eq!(tempered.ln_like().shape(), &[3, 2, 1]);
        assert_eq!(tempered.shape(), vec![3, 2, 1, 1]);
    }

    #[test]
    fn test_flatten_is_walker_major() {
        let chain = small_chain(3);
        let (post, ln_like) = chain.flatten_cold();

        assert_eq!(post.dim(), (6, 2));
        assert_eq!(post.column(0), array![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        assert_eq!(post.column(1), array![0.0, -1.0, -2.0, -10.0, -11.0, -12.0]);
        assert_eq!(ln_like, array![0.0, -1.0, -2.0, -10.0, -11.0, -12.0]);
    }

    #[test]
    fn test_flatten_uses_cold_rung_only() {
        let mut chain = ChainStore::new(labels(&["x"]), 2, 2, true, 1);
        let positions = array![[[1.0], [2.0]], [[100.0], [200.0]]];
        chain.push(&positions, &array![[-1.0, -2.0], [-100.0, -200.0]]);

        let (post, ln_like) = chain.flatten_cold();
        assert_eq!(post.column(0), array![1.0, 2.0]);
        assert_eq!(ln_like, array![-1.0, -2.0]);
    }

    #[test]
    fn test_chop_burn_and_trim() {
        let mut chain = small_chain(10);
        chain.chop(3, 2).unwrap();

        assert_eq!(chain.len(), 5);
        let tensor = chain.chain();
        assert_eq!(tensor[[0, 0, 0]], 3.0);
        assert_eq!(tensor[[0, 4, 0]], 7.0);
        assert_eq!(chain.ln_like()[[1, 0]], -13.0);
    }

    #[test]
    fn test_chop_rejects_invalid_bounds() {
        let mut chain = small_chain(5);

        assert!(matches!(chain.chop(5, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(chain.chop(3, 2), Err(Error::InvalidArgument(_))));
        assert!(matches!(chain.chop(0, 0), Err(Error::InvalidArgument(_))));
        assert!(chain.chop(usize::MAX, 1).is_err());

        // Nothing changed
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.chain()[[0, 0, 0]], 0.0);

        chain.chop(2, 2).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_has_shape() {
        let chain = small_chain(3);
        assert!(chain.has_shape(1, 2, 2));
        assert!(!chain.has_shape(1, 3, 2));
        assert!(!chain.has_shape(2, 2, 2));
        assert!(!chain.has_shape(1, 2, 1));
    }

    #[test]
    fn test_traces() {
        let chain = small_chain(5);
        let traces = chain.traces(0, 1, &[1], 1..4);
        assert_eq!(traces, array![[-11.0, -12.0, -13.0]]);
    }

    #[test]
    fn test_serialization() {
        let chain = small_chain(3);
        let serialised = serde_json::to_string(&chain).unwrap();
        let deserialised: ChainStore = serde_json::from_str(&serialised).unwrap();

        assert_eq!(deserialised.len(), chain.len());
        assert_eq!(deserialised.chain(), chain.chain());
        assert_eq!(deserialised.thin(), chain.thin());
    }

    fn gaussian_chain(n_walkers: usize, n_steps: usize, offset_per_walker: f64) -> ChainStore {
        let mut chain = ChainStore::new(labels(&["x"]), 1, n_walkers, false, 1);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let normal = Normal::new(0.0, 1.0).unwrap();

        for _ in 0..n_steps {
            let positions = Array3::from_shape_fn((1, n_walkers, 1), |(_, w, _)| {
                normal.sample(&mut rng) + offset_per_walker * w as f64
            });
            chain.push(&positions, &Array2::zeros((1, n_walkers)));
        }
        chain
    }

    #[test]
    fn test_r_hat_converged_chains() {
        let chain = gaussian_chain(4, 100, 0.0);
        let r_hat = chain.r_hat(10);

        assert_eq!(r_hat.len(), 1);
        assert!(r_hat["x"] > 0.9 && r_hat["x"] < 1.3, "R-hat = {}", r_hat["x"]);
        assert!(chain.is_converged(10, 1.1));
    }

    #[test]
    fn test_r_hat_diverged_chains() {
        let chain = gaussian_chain(4, 100, 10.0);
        let r_hat = chain.r_hat(10);
        assert!(r_hat["x"] > 2.0, "R-hat = {} (expected > 2.0)", r_hat["x"]);
        assert!(!chain.is_converged(10, 1.1));
    }

    #[test]
    fn test_r_hat_insufficient_samples() {
        let chain = small_chain(3);
        assert!(chain.r_hat(0).is_empty());
        assert!(!chain.is_converged(0, 1.1));
    }

    #[test]
    fn test_ess_independent_samples() {
        let chain = gaussian_chain(4, 200, 0.0);
        let ess = chain.ess(10);

        let total_samples = ((200 - 10) * 4) as f64;
        assert!(ess["x"] > 0.5 * total_samples, "ESS = {}", ess["x"]);
    }

    #[test]
    fn test_ess_correlated_samples() {
        let n_walkers = 4;
        let mut chain = ChainStore::new(labels(&["x"]), 1, n_walkers, false, 1);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let normal = Normal::new(0.0, 0.1).unwrap();
        let mut current = vec![0.0; n_walkers];

        for _ in 0..200 {
            // Random walk: highly autocorrelated
            for c in current.iter_mut() {
                *c += normal.sample(&mut rng);
            }
            let positions = Array3::from_shape_fn((1, n_walkers, 1), |(_, w, _)| current[w]);
            chain.push(&positions, &Array2::zeros((1, n_walkers)));
        }

        let ess = chain.ess(10);
        let total_samples = ((200 - 10) * n_walkers) as f64;
        assert!(ess["x"] < 0.3 * total_samples, "ESS = {}", ess["x"]);

        let tau = chain.autocorr_time(10);
        assert!(tau["x"] > 3.0, "tau = {}", tau["x"]);
    }

    #[test]
    fn test_autocorr_insufficient_samples() {
        let chain = small_chain(9);
        assert!(chain.ess(0).is_empty());
        assert!(chain.autocorr_time(0).is_empty());
    }

    #[test]
    fn test_compute_autocorrelation_constant_chain() {
        assert_eq!(compute_autocorrelation(&[1.0; 20], 5), vec![0.0; 5]);
    }
}
