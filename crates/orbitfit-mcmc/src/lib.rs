//! MCMC engine for fitting orbital parameters
//!
//! This crate draws posterior samples of orbital elements from an orbit model that
//! exposes priors and a log-likelihood over astrometric data. Two samplers are
//! provided behind a single controller, [`MCMC`]:
//!
//! - an affine-invariant ensemble sampler using the stretch move of
//!   Goodman & Weare (2010), selected with `num_temps` of 0 or 1;
//! - parallel tempering over a geometric temperature ladder with replica exchange
//!   between adjacent rungs, selected with `num_temps > 1`.
//!
//! # Module Organisation
//!
//! - `model`: the [`OrbitModel`] trait the sampler is generic over
//! - `stretch`, `tempering`, `mode`: proposals, the temperature ladder and one
//!   generation of either sampler
//! - `chain`, `results`: the stored chain and the flattened posterior derived from it
//! - `diagnostics`: trace figures for inspecting convergence
//! - `config`: sampler configuration, readable from TOML
//!
//! Likelihood evaluations run on a dedicated rayon thread pool. Every random draw
//! comes from a stream keyed by the seed, the generation and the walker, so the
//! sampled chain does not depend on the thread count.

pub mod chain;
pub mod config;
pub mod diagnostics;
mod error;
pub mod example_models;
pub mod mode;
pub mod model;
pub mod results;
mod rng;
pub mod sampler;
pub mod stretch;
pub mod tempering;
pub mod walkers;

pub use chain::ChainStore;
pub use config::SamplerConfig;
pub use diagnostics::{ExamineOptions, TraceFigure};
pub use error::{ConvergenceWarning, Error, Result};
pub use mode::SamplerMode;
pub use model::OrbitModel;
pub use results::Results;
pub use sampler::{Checkpoint, ProgressInfo, RunSummary, MCMC};
pub use stretch::StretchMove;
pub use tempering::TemperatureLadder;
pub use walkers::{WalkerInit, WalkerState};
