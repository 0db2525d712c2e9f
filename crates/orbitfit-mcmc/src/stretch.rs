//! The Goodman & Weare (2010) stretch move.
//!
//! A walker at `x` proposes `y = c + z (x - c)`, where `c` is the position of a
//! walker drawn from the complementary half of the ensemble and `z` is drawn from
//! `g(z) ∝ 1/sqrt(z)` on `[1/a, a]`. The proposal is accepted with probability
//! `min(1, z^(n-1) p(y)/p(x))`.
//!
//! # References
//!
//! Goodman, J., & Weare, J. (2010). Ensemble samplers with affine invariance.
//! Communications in Applied Mathematics and Computational Science, 5(1), 65-80.

use crate::{Error, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;

/// Stretch move with scale `a`; stretch factors are drawn from `[1/a, a]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchMove {
    pub a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self { a: 2.0 }
    }
}

/// A proposed position together with the stretch factor that produced it.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub position: Array1<f64>,
    pub z: f64,
}

impl StretchMove {
    /// Stretch move with scale `a`. Fails unless `a` is a number above 1; the
    /// default of 2 suits most orbit fits.
    pub fn new(a: f64) -> Result<Self> {
        if a.is_nan() || a <= 1.0 {
            return Err(Error::Configuration(format!(
                "Stretch move scale parameter must be > 1.0, got {}",
                a
            )));
        }
        Ok(Self { a })
    }

    /// Sample a stretch factor `z` in `[1/a, a]`.
    ///
    /// Inverse-CDF sampling of `g(z)`: `z = ((a - 1) u + 1)^2 / a` with `u ~ U(0, 1)`.
    pub fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        ((self.a - 1.0) * u + 1.0).powi(2) / self.a
    }

    /// Log of the Metropolis-Hastings acceptance ratio for a stretch move.
    ///
    /// `(n_params - 1) ln z + ln p(y) - ln p(x)`, capped at zero. Proposals with a
    /// non-finite (or NaN) log-posterior are never accepted.
    pub fn ln_acceptance(
        &self,
        z: f64,
        n_params: usize,
        ln_post_old: f64,
        ln_post_new: f64,
    ) -> f64 {
        if !ln_post_new.is_finite() {
            return f64::NEG_INFINITY;
        }
        if ln_post_old == f64::NEG_INFINITY {
            // Any valid position beats a walker stranded outside the support
            return 0.0;
        }

        let ln_ratio = (n_params as f64 - 1.0) * z.ln() + (ln_post_new - ln_post_old);
        ln_ratio.min(0.0)
    }

    /// Acceptance probability in `[0, 1]`.
    pub fn acceptance_probability(
        &self,
        z: f64,
        n_params: usize,
        ln_post_old: f64,
        ln_post_new: f64,
    ) -> f64 {
        self.ln_acceptance(z, n_params, ln_post_old, ln_post_new).exp()
    }

    /// Generate a proposal for `current` from a randomly chosen complementary walker.
    ///
    /// `complementary` holds one walker per row and must not be empty.
    pub fn propose<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        current: ArrayView1<f64>,
        complementary: ArrayView2<f64>,
    ) -> Proposal {
        let z = self.sample_z(rng);
        let anchor = complementary.row(rng.gen_range(0..complementary.nrows()));

        let position = &anchor + &((&current - &anchor) * z);

        Proposal { position, z }
    }
}
