//! Walker positions and their initialisation.

use crate::model::{Evaluation, OrbitModel};
use crate::{Error, Result};
use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Walker initialisation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkerInit {
    /// Sample walkers from the prior distribution
    FromPrior,

    /// Scatter walkers uniformly in a box around a point
    Ball {
        /// Center point for the ball
        center: Vec<f64>,
        /// Full width of the box in each dimension
        radius: f64,
    },

    /// Explicit walker positions, shape (n_walkers, n_params).
    ///
    /// In parallel-tempering mode every rung starts from the same positions.
    Explicit(Array2<f64>),
}

impl WalkerInit {
    /// Initialize walker positions for every rung.
    ///
    /// Returns an array of shape (n_rungs, n_walkers, n_params).
    pub fn initialize<M, R>(
        &self,
        n_rungs: usize,
        n_walkers: usize,
        model: &M,
        rng: &mut R,
    ) -> Result<Array3<f64>>
    where
        M: OrbitModel + ?Sized,
        R: RngCore,
    {
        let n_params = model.n_params();
        let mut positions = Array3::zeros((n_rungs, n_walkers, n_params));

        match self {
            WalkerInit::FromPrior => {
                for mut walker in positions.lanes_mut(Axis(2)) {
                    let draw = model.sample_prior(rng);
                    if draw.len() != n_params {
                        return Err(Error::Configuration(format!(
                            "Prior draw has {} values, expected {}",
                            draw.len(),
                            n_params
                        )));
                    }
                    walker.assign(&ArrayView1::from(draw.as_slice()));
                }
            }
            WalkerInit::Ball { center, radius } => {
                if center.len() != n_params {
                    return Err(Error::Configuration(format!(
                        "Ball center length {} does not match parameter count {}",
                        center.len(),
                        n_params
                    )));
                }

                for mut walker in positions.lanes_mut(Axis(2)) {
                    for (value, &c) in walker.iter_mut().zip(center) {
                        let offset = rng.gen::<f64>() - 0.5;
                        *value = c + offset * radius;
                    }
                }
            }
            WalkerInit::Explicit(explicit) => {
                if explicit.dim() != (n_walkers, n_params) {
                    return Err(Error::Configuration(format!(
                        "Explicit positions have shape {:?}, expected ({}, {})",
                        explicit.dim(),
                        n_walkers,
                        n_params
                    )));
                }
                for mut rung in positions.outer_iter_mut() {
                    rung.assign(explicit);
                }
            }
        }

        Ok(positions)
    }
}

/// Current state of every walker on every rung.
///
/// Ensemble mode holds a single rung.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerState {
    /// Current positions: shape (n_rungs, n_walkers, n_params)
    pub positions: Array3<f64>,

    /// Log-prior at the current positions: shape (n_rungs, n_walkers)
    pub ln_prior: Array2<f64>,

    /// Log-likelihood at the current positions: shape (n_rungs, n_walkers)
    pub ln_like: Array2<f64>,

    /// Accepted proposals per walker: shape (n_rungs, n_walkers)
    pub n_accepted: Array2<usize>,

    /// Proposals made per walker: shape (n_rungs, n_walkers)
    pub n_proposed: Array2<usize>,
}

impl WalkerState {
    /// Wrap freshly initialised positions.
    ///
    /// Log-densities start at negative infinity until the first evaluation.
    pub fn new(positions: Array3<f64>) -> Result<Self> {
        let (n_rungs, n_walkers, _) = positions.dim();
        if n_walkers < 2 {
            return Err(Error::Configuration(
                "Must have at least 2 walkers for ensemble sampling".to_string(),
            ));
        }

        Ok(Self {
            positions,
            ln_prior: Array2::from_elem((n_rungs, n_walkers), f64::NEG_INFINITY),
            ln_like: Array2::from_elem((n_rungs, n_walkers), f64::NEG_INFINITY),
            n_accepted: Array2::zeros((n_rungs, n_walkers)),
            n_proposed: Array2::zeros((n_rungs, n_walkers)),
        })
    }

    pub fn n_rungs(&self) -> usize {
        self.positions.len_of(Axis(0))
    }

    pub fn n_walkers(&self) -> usize {
        self.positions.len_of(Axis(1))
    }

    pub fn n_params(&self) -> usize {
        self.positions.len_of(Axis(2))
    }

    pub(crate) fn evaluation(&self, rung: usize, walker: usize) -> Evaluation {
        Evaluation {
            ln_prior: self.ln_prior[[rung, walker]],
            ln_like: self.ln_like[[rung, walker]],
        }
    }

    pub(crate) fn set_evaluation(&mut self, rung: usize, walker: usize, eval: Evaluation) {
        self.ln_prior[[rung, walker]] = eval.ln_prior;
        self.ln_like[[rung, walker]] = eval.ln_like;
    }

    /// Swap the full state of walker `a` on `rung_a` with walker `b` on `rung_b`.
    pub(crate) fn swap_walkers(&mut self, rung_a: usize, a: usize, rung_b: usize, b: usize) {
        let n_params = self.n_params();
        for p in 0..n_params {
            let tmp = self.positions[[rung_a, a, p]];
            self.positions[[rung_a, a, p]] = self.positions[[rung_b, b, p]];
            self.positions[[rung_b, b, p]] = tmp;
        }

        let eval_a = self.evaluation(rung_a, a);
        let eval_b = self.evaluation(rung_b, b);
        self.set_evaluation(rung_a, a, eval_b);
        self.set_evaluation(rung_b, b, eval_a);
    }

    /// Number of walkers on `rung` currently outside the prior support or with zero
    /// likelihood.
    pub fn n_invalid(&self, rung: usize) -> usize {
        self.ln_like
            .row(rung)
            .iter()
            .zip(self.ln_prior.row(rung))
            .filter(|(l, p)| !l.is_finite() || !p.is_finite())
            .count()
    }

    /// Fraction of accepted proposals for each walker on `rung`.
    ///
    /// Returns 0.0 for walkers that have not had any proposals yet.
    pub fn acceptance_fraction(&self, rung: usize) -> Array1<f64> {
        acceptance_fraction(
            self.n_accepted.row(rung).to_owned(),
            self.n_proposed.row(rung).to_owned(),
        )
    }
}

/// Elementwise `accepted / proposed`, 0.0 where nothing was proposed.
pub(crate) fn acceptance_fraction(accepted: Array1<usize>, proposed: Array1<usize>) -> Array1<f64> {
    accepted
        .iter()
        .zip(proposed.iter())
        .map(|(&a, &p)| if p > 0 { a as f64 / p as f64 } else { 0.0 })
        .collect()
}
