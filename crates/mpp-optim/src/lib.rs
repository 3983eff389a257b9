#![deny(missing_docs)]

//! Simulated-annealing optimizer for marked point process configurations.
//!
//! [`Optimizer::run`] drives one chain: select a kernel, propose, evaluate
//! the incremental energy change, accept or reject with the
//! Metropolis-Hastings rule, report, and check termination. [`run_chains`]
//! runs independent chains in parallel.

/// Metropolis-Hastings acceptance rule.
pub mod acceptance;
/// Independent parallel chains.
pub mod chains;
/// YAML run configuration.
pub mod config;
/// Energy features, the weighted scheme and incremental evaluation.
pub mod energy;
/// Per-iteration records and feedback receivers.
pub mod feedback;
/// Birth, death and move proposal kernels.
pub mod kernel;
/// The optimization loop.
pub mod optimizer;
/// Run report serialization.
pub mod report;
/// Annealing schedules.
pub mod schedule;
/// Per-kernel execution statistics.
pub mod stats;
/// Termination conditions.
pub mod termination;
/// Incremental energy bookkeeping.
pub mod total;

pub use acceptance::{accept, acceptance_probability};
pub use chains::{best_chain, chain_seed, run_chains, ChainOutcome};
pub use config::{KernelConfig, RunConfig, SeedPolicy};
pub use energy::{EnergyModel, EnergyScheme, IndividualFeature, PairwiseFeature};
pub use feedback::{
    trajectory_hash, AggregateReceiver, AggregateWindow, CsvFeedback, FeedbackFanout,
    FeedbackReceiver, LogFeedback, NullFeedback, PeriodicFeedback, RecordingFeedback, Reporting,
    RunBegin, RunEnd, TrajectoryHasher,
};
pub use kernel::{Kernel, KernelFamily, KernelSet, Proposal};
pub use optimizer::{EnergyFailurePolicy, FinalState, Optimizer, RunOptions};
pub use report::{ChainSummary, RunReport};
pub use schedule::{AnnealingSchedule, ScheduleConfig};
pub use stats::{KernelStatistics, KernelStats, Outcome};
pub use termination::{
    AllOf, EnergyBelow, MaxIterations, Stagnation, TerminationCondition, TerminationTrigger,
    TriggerTerminationCondition, WallClockLimit,
};
pub use total::EnergyTotal;
