//! Interface between the sampler and the orbit model.
//!
//! The sampler never looks inside the orbital mechanics. It needs three things from
//! a model: the ordered parameter labels, a way to draw from the prior, and the
//! log-prior/log-likelihood of a parameter vector.

use crate::Result;
use rand::RngCore;

/// An orbit-fitting system as seen by the sampler.
///
/// Implementations must be thread-safe: log-likelihoods for different walkers are
/// evaluated concurrently on the sampler's thread pool.
pub trait OrbitModel: Send + Sync {
    /// Ordered labels of the free parameters (e.g. `sma1`, `ecc1`, `inc1`).
    ///
    /// The order is fixed for the lifetime of the sampler.
    fn param_labels(&self) -> &[String];

    /// Draw one parameter vector from the prior.
    fn sample_prior(&self, rng: &mut dyn RngCore) -> Vec<f64>;

    /// Log-prior density of a parameter vector.
    ///
    /// Returns negative infinity outside the prior support. The default is a flat
    /// improper prior.
    fn ln_prior(&self, _params: &[f64]) -> f64 {
        0.0
    }

    /// Log-likelihood of a parameter vector given the observations.
    ///
    /// May fail with [`Error::Model`](crate::Error::Model) for physically invalid
    /// vectors; the sampler treats any failure as zero likelihood.
    fn ln_likelihood(&self, params: &[f64]) -> Result<f64>;

    /// Number of free parameters.
    fn n_params(&self) -> usize {
        self.param_labels().len()
    }
}

/// Log-prior and log-likelihood of a single walker position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Evaluation {
    pub ln_prior: f64,
    pub ln_like: f64,
}

impl Evaluation {
    pub(crate) const REJECTED: Evaluation = Evaluation {
        ln_prior: f64::NEG_INFINITY,
        ln_like: f64::NEG_INFINITY,
    };

    /// Tempered log-posterior `ln_prior + beta * ln_like`.
    ///
    /// Positions outside the prior support are `-inf` at every temperature,
    /// including `beta = 0`.
    pub(crate) fn ln_posterior(&self, beta: f64) -> f64 {
        if !self.ln_prior.is_finite() || !self.ln_like.is_finite() {
            return f64::NEG_INFINITY;
        }
        self.ln_prior + beta * self.ln_like
    }
}

/// Evaluate a position, folding every failure into `-inf`.
///
/// The likelihood is skipped entirely outside the prior support.
pub(crate) fn evaluate<M: OrbitModel + ?Sized>(model: &M, params: &[f64]) -> Evaluation {
    let ln_prior = model.ln_prior(params);
    if !ln_prior.is_finite() {
        return Evaluation::REJECTED;
    }

    match model.ln_likelihood(params) {
        Ok(ln_like) if !ln_like.is_nan() => Evaluation { ln_prior, ln_like },
        _ => Evaluation {
            ln_prior,
            ln_like: f64::NEG_INFINITY,
        },
    }
}
