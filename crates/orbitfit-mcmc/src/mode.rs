//! Advancing the walkers by one generation.
//!
//! Both sampling modes share the stretch-move sweep: the walkers of every rung are
//! split into two halves and each half is updated in parallel against the positions
//! of the other half. No walker ever reads a position that is being updated in the
//! same sweep. Parallel tempering adds a replica-exchange step between adjacent
//! rungs once both halves have been updated.

use crate::model::{evaluate, Evaluation, OrbitModel};
use crate::rng::{self, Purpose};
use crate::stretch::StretchMove;
use crate::tempering::{propose_swaps, TemperatureLadder};
use crate::walkers::WalkerState;
use ndarray::{s, Array1};
use rand::Rng;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Sampling strategy, fixed when the sampler is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SamplerMode {
    /// Affine-invariant ensemble sampler with a single rung.
    Ensemble,

    /// Parallel tempering over a ladder of rungs.
    ParallelTempering(TemperatureLadder),
}

/// Everything a generation needs besides the walker state.
pub(crate) struct Sweep<'a, M: OrbitModel> {
    pub model: &'a M,
    pub pool: &'a ThreadPool,
    pub stretch: StretchMove,
    pub seed: u64,
}

/// Swap bookkeeping for one generation.
#[derive(Debug, Clone, Default)]
pub(crate) struct GenerationOutcome {
    /// Accepted swaps per adjacent rung pair (empty in ensemble mode)
    pub swaps_accepted: Vec<usize>,
}

/// Result of one walker's proposal, computed off the barrier.
struct Move {
    rung: usize,
    walker: usize,
    position: Array1<f64>,
    evaluation: Evaluation,
    accepted: bool,
}

impl SamplerMode {
    pub fn is_tempered(&self) -> bool {
        matches!(self, SamplerMode::ParallelTempering(_))
    }

    /// Inverse temperature of each rung.
    pub fn betas(&self) -> &[f64] {
        match self {
            SamplerMode::Ensemble => &[1.0],
            SamplerMode::ParallelTempering(ladder) => ladder.betas(),
        }
    }

    pub fn n_rungs(&self) -> usize {
        self.betas().len()
    }

    /// Advance every walker on every rung by one generation.
    pub(crate) fn advance<M: OrbitModel>(
        &self,
        sweep: &Sweep<'_, M>,
        state: &mut WalkerState,
        generation: u64,
    ) -> GenerationOutcome {
        let n_walkers = state.n_walkers();
        let half = n_walkers / 2;
        let betas = self.betas();

        update_half(sweep, state, betas, 0..half, half..n_walkers, generation);
        update_half(sweep, state, betas, half..n_walkers, 0..half, generation);

        match self {
            SamplerMode::Ensemble => GenerationOutcome::default(),
            SamplerMode::ParallelTempering(ladder) => {
                let mut rng = rng::stream(sweep.seed, Purpose::Swap, generation, 0);
                GenerationOutcome {
                    swaps_accepted: propose_swaps(state, ladder.betas(), &mut rng),
                }
            }
        }
    }
}

/// Evaluate the current position of every walker on every rung.
pub(crate) fn evaluate_all<M: OrbitModel>(model: &M, pool: &ThreadPool, state: &mut WalkerState) {
    let (n_rungs, n_walkers) = (state.n_rungs(), state.n_walkers());
    let positions = &state.positions;

    let evaluations: Vec<Evaluation> = pool.install(|| {
        (0..n_rungs * n_walkers)
            .into_par_iter()
            .map(|i| {
                let params = positions.slice(s![i / n_walkers, i % n_walkers, ..]).to_vec();
                evaluate(model, &params)
            })
            .collect()
    });

    for (i, evaluation) in evaluations.into_iter().enumerate() {
        state.set_evaluation(i / n_walkers, i % n_walkers, evaluation);
    }
}

/// Stretch-move update of the `active` walkers of every rung against the
/// `complementary` walkers of the same rung.
fn update_half<M: OrbitModel>(
    sweep: &Sweep<'_, M>,
    state: &mut WalkerState,
    betas: &[f64],
    active: Range<usize>,
    complementary: Range<usize>,
    generation: u64,
) {
    let n_walkers = state.n_walkers();
    let n_params = state.n_params();
    let jobs: Vec<(usize, usize)> = (0..betas.len())
        .flat_map(|t| active.clone().map(move |w| (t, w)))
        .collect();

    let current: &WalkerState = state;
    let moves: Vec<Move> = sweep.pool.install(|| {
        jobs.par_iter()
            .map(|&(t, w)| {
                let index = (t * n_walkers + w) as u64;
                let mut rng = rng::stream(sweep.seed, Purpose::Walker, generation, index);

                let proposal = sweep.stretch.propose(
                    &mut rng,
                    current.positions.slice(s![t, w, ..]),
                    current.positions.slice(s![t, complementary.clone(), ..]),
                );
                let evaluation = evaluate(sweep.model, &proposal.position.to_vec());

                let ln_accept = sweep.stretch.ln_acceptance(
                    proposal.z,
                    n_params,
                    current.evaluation(t, w).ln_posterior(betas[t]),
                    evaluation.ln_posterior(betas[t]),
                );
                let accepted = rng.gen::<f64>().ln() < ln_accept;

                Move {
                    rung: t,
                    walker: w,
                    position: proposal.position,
                    evaluation,
                    accepted,
                }
            })
            .collect()
    });

    // Barrier: every proposal of this half is resolved before any walker moves
    for mv in moves {
        state.n_proposed[[mv.rung, mv.walker]] += 1;
        if mv.accepted {
            state
                .positions
                .slice_mut(s![mv.rung, mv.walker, ..])
                .assign(&mv.position);
            state.set_evaluation(mv.rung, mv.walker, mv.evaluation);
            state.n_accepted[[mv.rung, mv.walker]] += 1;
        }
    }
}
