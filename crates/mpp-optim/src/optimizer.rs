use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use mpp_core::errors::ErrorInfo;
use mpp_core::{MppError, RngHandle};
use mpp_mark::Configuration;
use serde::{Deserialize, Serialize};

use crate::acceptance::{accept, acceptance_probability};
use crate::energy::EnergyModel;
use crate::feedback::{FeedbackReceiver, Reporting, RunBegin, RunEnd};
use crate::kernel::{KernelSet, ProposalContext};
use crate::schedule::AnnealingSchedule;
use crate::stats::{KernelStatistics, Outcome};
use crate::termination::TerminationCondition;
use crate::total::{EnergyDelta, EnergyTotal};

/// What the loop does when an energy term cannot be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnergyFailurePolicy {
    /// Stop the run and return the failure with the final state.
    #[default]
    Abort,
    /// Count the iteration as not proposed and carry on.
    Skip,
}

/// Tunables of the loop that do not affect the target distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Recompute the energy from scratch every this many iterations; zero
    /// audits only at the end of the run.
    #[serde(default = "default_audit_interval")]
    pub audit_interval: u64,
    /// Relative tolerance of the audit.
    #[serde(default = "default_audit_tolerance")]
    pub audit_tolerance: f64,
    /// Severity of energy calculation failures.
    #[serde(default)]
    pub energy_failure: EnergyFailurePolicy,
}

fn default_audit_interval() -> u64 {
    1_000
}

fn default_audit_tolerance() -> f64 {
    1e-9
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            audit_interval: default_audit_interval(),
            audit_tolerance: default_audit_tolerance(),
            energy_failure: EnergyFailurePolicy::default(),
        }
    }
}

/// Result of a run. Always returned, even when the run stopped on a failure.
#[derive(Debug)]
pub struct FinalState {
    /// Deep snapshot of the lowest-energy configuration seen.
    pub best: Configuration,
    /// Energy of `best`.
    pub best_energy: f64,
    /// Configuration the chain ended in.
    pub current: Configuration,
    /// Running energy of `current`.
    pub current_energy: f64,
    /// Iterations executed.
    pub iterations: u64,
    /// Per-kernel execution statistics.
    pub statistics: KernelStatistics,
    /// Number of feedback calls that returned an error.
    pub feedback_failures: u64,
    /// Failure that stopped the run early.
    pub failure: Option<MppError>,
}

impl FinalState {
    /// Returns `true` when the run stopped on a failure.
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Simulated-annealing optimizer over marked point configurations.
pub struct Optimizer {
    kernels: KernelSet,
    model: EnergyModel,
    schedule: Arc<dyn AnnealingSchedule>,
    options: RunOptions,
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field("kernels", &self.kernels.names())
            .field("model", &self.model)
            .field("options", &self.options)
            .finish()
    }
}

// Where an iteration ended up before feedback is emitted.
struct Step {
    outcome: Outcome,
    delta: Option<f64>,
    ratio: Option<f64>,
    probability: Option<f64>,
    changed: Vec<mpp_core::MarkId>,
    failure: Option<String>,
}

impl Step {
    fn not_proposed(reason: String) -> Self {
        Self {
            outcome: Outcome::NotProposed,
            delta: None,
            ratio: None,
            probability: None,
            changed: Vec::new(),
            failure: Some(reason),
        }
    }
}

impl Optimizer {
    /// Creates an optimizer; fails when no kernel can be selected.
    pub fn new(
        kernels: KernelSet,
        model: EnergyModel,
        schedule: Arc<dyn AnnealingSchedule>,
    ) -> Result<Self, MppError> {
        kernels.validate()?;
        Ok(Self {
            kernels,
            model,
            schedule,
            options: RunOptions::default(),
        })
    }

    /// Replaces the run options.
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Configured kernels.
    pub fn kernels(&self) -> &KernelSet {
        &self.kernels
    }

    /// Energy model shared by every run.
    pub fn model(&self) -> &EnergyModel {
        &self.model
    }

    /// Run options.
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs one chain from `initial` until `termination` says stop or a fatal
    /// failure occurs.
    ///
    /// Random draws are consumed per iteration in a fixed order: one for the
    /// kernel choice, then the kernel's own draws, then one acceptance draw
    /// whenever a proposal was evaluated.
    pub fn run(
        &self,
        initial: Configuration,
        termination: &mut dyn TerminationCondition,
        feedback: &mut dyn FeedbackReceiver,
        rng: &mut RngHandle,
    ) -> FinalState {
        let mut statistics = KernelStatistics::new(self.kernels.names());
        let mut feedback_failures = 0u64;
        let mut current = initial;

        let mut total = match self.model.initialize(&current) {
            Ok(total) => total,
            Err(err) => {
                error!("initial configuration could not be scored: {err}");
                let best = current.fork();
                return FinalState {
                    best,
                    best_energy: f64::NAN,
                    current,
                    current_energy: f64::NAN,
                    iterations: 0,
                    statistics,
                    feedback_failures,
                    failure: Some(err),
                };
            }
        };
        let mut best = current.fork();
        let mut best_energy = total.total();

        info!(
            "optimization start: {} marks, energy {:.6}, {} kernels",
            current.len(),
            best_energy,
            self.kernels.len()
        );
        let begin = RunBegin {
            initial_energy: best_energy,
            initial_marks: current.len(),
            kernels: self.kernels.names(),
        };
        if let Err(err) = feedback.report_begin(&begin) {
            feedback_failures += 1;
            warn!("feedback receiver failed at run begin: {err}");
        }

        let extent = self.model.voxels.stack.extent();
        let mut iteration = 0u64;
        let mut failure = None;

        while termination.continue_iterations(iteration, total.total(), current.len()) {
            let temperature = self.schedule.temperature(iteration);
            let kernel_id = match self.kernels.select(rng) {
                Ok(id) => id,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };
            let Some((kernel_name, entry)) = self.kernels.get(kernel_id) else {
                failure = Some(MppError::Inconsistency(
                    ErrorInfo::new("unknown-kernel", "selected kernel identifier out of range")
                        .with_context("kernel", kernel_id.to_string()),
                ));
                break;
            };
            let context = ProposalContext {
                extent,
                selection: self.kernels.selection(kernel_id),
            };

            let started = Instant::now();
            let step = match entry.kernel.propose(&current, &context, rng) {
                Err(err) => Ok(Step::not_proposed(err.info().code.clone())),
                Ok(proposal) => match self.model.evaluate(&current, &total, &proposal) {
                    Err(err) if err.is_fatal() => Err(err),
                    Err(err) => match self.options.energy_failure {
                        EnergyFailurePolicy::Abort => Err(err.with_context("kernel", kernel_name)),
                        EnergyFailurePolicy::Skip => {
                            warn!("iteration {iteration}: skipping {kernel_name} proposal: {err}");
                            Ok(Step::not_proposed(err.info().code.clone()))
                        }
                    },
                    Ok(delta) => {
                        let energy_change = delta.delta();
                        let probability =
                            acceptance_probability(energy_change, temperature, proposal.ratio);
                        let accepted = accept(probability, rng.next_uniform());
                        let changed = proposal.changed_ids();
                        let applied = if accepted {
                            apply(&mut current, &mut total, delta)
                        } else {
                            Ok(())
                        };
                        applied.map(|()| Step {
                            outcome: if accepted {
                                Outcome::Accepted
                            } else {
                                Outcome::Rejected
                            },
                            delta: Some(energy_change),
                            ratio: Some(proposal.ratio),
                            probability: Some(probability),
                            changed,
                            failure: None,
                        })
                    }
                },
            };
            let elapsed = started.elapsed();

            let step = match step {
                Ok(step) => step,
                Err(err) => {
                    error!("iteration {iteration}: run halted by {kernel_name}: {err}");
                    failure = Some(err);
                    break;
                }
            };
            statistics.record(kernel_id, step.outcome, elapsed);

            let energy = total.total();
            let new_best = step.outcome == Outcome::Accepted && energy < best_energy;
            if new_best {
                best_energy = energy;
                best = current.fork();
                debug!("iteration {iteration}: new best energy {energy:.6} with {} marks", current.len());
            }

            let record = Reporting {
                iteration,
                kernel_id,
                kernel: kernel_name.to_string(),
                proposed: step.outcome != Outcome::NotProposed,
                accepted: step.outcome == Outcome::Accepted,
                new_best,
                temperature,
                delta: step.delta,
                ratio: step.ratio,
                acceptance_probability: step.probability,
                energy,
                best_energy,
                mark_count: current.len(),
                changed: step.changed,
                failure: step.failure,
                execution_nanos: duration_nanos(elapsed),
            };
            if let Err(err) = feedback.report_iteration(&record) {
                feedback_failures += 1;
                warn!("iteration {iteration}: feedback receiver failed: {err}");
            }
            iteration += 1;

            let interval = self.options.audit_interval;
            if interval > 0 && iteration % interval == 0 {
                if let Err(err) = self.model.audit(&current, &total, self.options.audit_tolerance) {
                    error!("iteration {iteration}: consistency audit failed: {err}");
                    failure = Some(err);
                    break;
                }
            }
        }

        if failure.is_none() {
            if let Err(err) = self.model.audit(&current, &total, self.options.audit_tolerance) {
                error!("final consistency audit failed: {err}");
                failure = Some(err);
            }
        }

        let end = RunEnd {
            iterations: iteration,
            best_energy,
            final_energy: total.total(),
            failure: failure.as_ref().map(|err| err.to_string()),
        };
        if let Err(err) = feedback.report_end(&end) {
            feedback_failures += 1;
            warn!("feedback receiver failed at run end: {err}");
        }
        info!(
            "optimization end: {iteration} iterations, best energy {best_energy:.6} ({} marks), final energy {:.6}",
            best.len(),
            total.total()
        );

        FinalState {
            best,
            best_energy,
            current_energy: total.total(),
            current,
            iterations: iteration,
            statistics,
            feedback_failures,
            failure,
        }
    }
}

/// Applies an accepted delta to the live configuration and its energy book.
/// Pure removals go first; re-added identifiers are exchanged in place so the
/// freshly evaluated voxelization moves into the configuration.
fn apply(
    configuration: &mut Configuration,
    total: &mut EnergyTotal,
    delta: EnergyDelta,
) -> Result<(), MppError> {
    let EnergyDelta { removed, added, .. } = delta;
    for id in &removed {
        if added.iter().any(|pending| pending.memo.id() == *id) {
            continue;
        }
        total.remove(*id)?;
        configuration.remove(*id)?;
    }
    for pending in added {
        let id = pending.memo.id();
        if removed.contains(&id) {
            total.exchange(pending.contribution)?;
            configuration.exchange_memo(pending.memo)?;
        } else {
            total.add(pending.contribution)?;
            configuration.insert_memo(pending.memo)?;
        }
    }
    Ok(())
}

fn duration_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}
