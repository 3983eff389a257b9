use log::info;
use mpp_core::{derive_substream_seed, MppError, RngHandle};
use mpp_mark::Configuration;
use rayon::prelude::*;

use crate::feedback::{FeedbackReceiver, Reporting, RunBegin, RunEnd, TrajectoryHasher};
use crate::optimizer::{FinalState, Optimizer};
use crate::termination::TerminationCondition;

/// Seed of chain `chain` under `master_seed`.
pub fn chain_seed(master_seed: u64, chain: usize) -> u64 {
    derive_substream_seed(master_seed, chain as u64)
}

/// Result of one independent chain.
#[derive(Debug)]
pub struct ChainOutcome {
    /// Chain index.
    pub chain: usize,
    /// Seed the chain's random source started from.
    pub seed: u64,
    /// Final state of the chain.
    pub state: FinalState,
    /// Hash of the chain's reporting sequence.
    pub trajectory_hash: String,
}

// Forwards to the caller's receiver while hashing the trajectory.
struct HashingTee {
    inner: Box<dyn FeedbackReceiver>,
    hasher: TrajectoryHasher,
}

impl FeedbackReceiver for HashingTee {
    fn report_begin(&mut self, begin: &RunBegin) -> Result<(), MppError> {
        self.inner.report_begin(begin)
    }

    fn report_iteration(&mut self, record: &Reporting) -> Result<(), MppError> {
        self.hasher.update(record);
        self.inner.report_iteration(record)
    }

    fn report_end(&mut self, end: &RunEnd) -> Result<(), MppError> {
        self.inner.report_end(end)
    }
}

/// Runs `chains` independent chains in parallel from forks of `initial`.
///
/// Every chain owns its configuration, caches, random source, termination
/// condition and feedback receiver; only the optimizer (stack, scheme,
/// kernels) is shared read-only. Outcomes are returned in chain order and
/// depend only on `master_seed`, never on thread scheduling.
pub fn run_chains<T, F>(
    optimizer: &Optimizer,
    initial: &Configuration,
    master_seed: u64,
    chains: usize,
    make_termination: T,
    make_feedback: F,
) -> Vec<ChainOutcome>
where
    T: Fn(usize) -> Box<dyn TerminationCondition> + Sync,
    F: Fn(usize) -> Box<dyn FeedbackReceiver> + Sync,
{
    let starts: Vec<(usize, Configuration)> =
        (0..chains).map(|chain| (chain, initial.fork())).collect();
    info!("running {chains} chains with master seed {master_seed}");
    starts
        .into_par_iter()
        .map(|(chain, start)| {
            let seed = chain_seed(master_seed, chain);
            let mut rng = RngHandle::from_seed(seed);
            let mut termination = make_termination(chain);
            let mut feedback = HashingTee {
                inner: make_feedback(chain),
                hasher: TrajectoryHasher::new(),
            };
            let state = optimizer.run(start, termination.as_mut(), &mut feedback, &mut rng);
            ChainOutcome {
                chain,
                seed,
                state,
                trajectory_hash: feedback.hasher.finish(),
            }
        })
        .collect()
}

/// Chain with the lowest best energy among those that finished without a
/// failure; ties go to the lower chain index.
pub fn best_chain(outcomes: &[ChainOutcome]) -> Option<&ChainOutcome> {
    outcomes
        .iter()
        .filter(|outcome| outcome.state.failure.is_none() && !outcome.state.best_energy.is_nan())
        .min_by(|a, b| {
            a.state
                .best_energy
                .total_cmp(&b.state.best_energy)
                .then(a.chain.cmp(&b.chain))
        })
}
