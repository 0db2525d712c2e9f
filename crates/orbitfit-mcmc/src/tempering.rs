//! Temperature ladder and replica exchange for parallel tempering.
//!
//! Rung `i` samples `prior × likelihood^beta_i`. Rung 0 has `beta = 1` and is the
//! only one that feeds inference; hotter rungs see a flattened likelihood and move
//! more freely. After every generation, walkers on adjacent rungs propose to
//! exchange positions.
//!
//! # References
//!
//! Vousden, W. D., Farr, W. M., & Mandel, I. (2016). Dynamic temperature selection
//! for parallel tempering in Markov chain Monte Carlo simulations. MNRAS, 455(2),
//! 1919-1937.

use crate::walkers::WalkerState;
use crate::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Geometrically spaced inverse temperatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureLadder {
    betas: Vec<f64>,
}

impl TemperatureLadder {
    /// Build a ladder of `n_rungs` temperatures `T_i = step^i`.
    ///
    /// When `step` is `None` it is chosen from the parameter count so that
    /// adjacent rungs overlap enough for swaps to be accepted.
    pub fn new(n_rungs: usize, n_params: usize, step: Option<f64>) -> Result<Self> {
        if n_rungs == 0 {
            return Err(Error::Configuration(
                "Temperature ladder needs at least one rung".to_string(),
            ));
        }
        let step = step.unwrap_or_else(|| Self::default_step(n_params));
        if !step.is_finite() || step <= 1.0 {
            return Err(Error::Configuration(format!(
                "Temperature step must be a finite value > 1.0, got {}",
                step
            )));
        }

        let betas = (0..n_rungs).map(|i| step.powi(-(i as i32))).collect();
        Ok(Self { betas })
    }

    /// `1 + 2 sqrt(ln 4) / sqrt(n_params)`.
    pub fn default_step(n_params: usize) -> f64 {
        1.0 + 2.0 * 4f64.ln().sqrt() / (n_params.max(1) as f64).sqrt()
    }

    /// Inverse temperatures, coldest (`beta = 1`) first.
    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn temperatures(&self) -> Vec<f64> {
        self.betas.iter().map(|b| 1.0 / b).collect()
    }

    pub fn n_rungs(&self) -> usize {
        self.betas.len()
    }
}

/// Propose exchanges between every pair of adjacent rungs, hottest pair first.
///
/// Walkers of the two rungs are paired through independent random permutations.
/// A pair swaps with probability `min(1, exp((beta_c - beta_h) (lnL_h - lnL_c)))`
/// where `c` is the colder and `h` the hotter rung. Returns the number of accepted
/// swaps for each pair; entry `i` counts swaps between rungs `i` and `i + 1`.
pub(crate) fn propose_swaps<R: Rng + ?Sized>(
    state: &mut WalkerState,
    betas: &[f64],
    rng: &mut R,
) -> Vec<usize> {
    let n_walkers = state.n_walkers();
    let mut accepted = vec![0; betas.len().saturating_sub(1)];

    for hot in (1..betas.len()).rev() {
        let cold = hot - 1;
        let d_beta = betas[cold] - betas[hot];

        let mut hot_perm: Vec<usize> = (0..n_walkers).collect();
        let mut cold_perm: Vec<usize> = (0..n_walkers).collect();
        hot_perm.shuffle(rng);
        cold_perm.shuffle(rng);

        for (&h, &c) in hot_perm.iter().zip(&cold_perm) {
            let ln_u = rng.gen::<f64>().ln();
            let ln_accept = d_beta * (state.ln_like[[hot, h]] - state.ln_like[[cold, c]]);

            // NaN (both walkers at -inf) compares false and is rejected
            if ln_accept > ln_u {
                state.swap_walkers(hot, h, cold, c);
                accepted[cold] += 1;
            }
        }
    }

    accepted
}
