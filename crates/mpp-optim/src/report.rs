use std::fs;
use std::path::Path;

use mpp_core::errors::ErrorInfo;
use mpp_core::MppError;
use mpp_mark::Mark;
use serde::{Deserialize, Serialize};

use crate::chains::{best_chain, ChainOutcome};
use crate::config::RunConfig;
use crate::stats::KernelStatistics;

/// Per-chain line of a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSummary {
    /// Chain index.
    pub chain: usize,
    /// Seed of the chain's random source.
    pub seed: u64,
    /// Iterations executed.
    pub iterations: u64,
    /// Best energy reached; absent when the initial state could not be scored.
    pub best_energy: Option<f64>,
    /// Number of marks in the best configuration.
    pub best_marks: usize,
    /// Failure that stopped the chain.
    pub failure: Option<String>,
    /// Hash of the chain's reporting sequence.
    pub trajectory_hash: String,
}

/// Structured summary of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Configuration used for the run.
    pub config: RunConfig,
    /// Master seed chain seeds were derived from.
    pub master_seed: u64,
    /// Optional seed label captured from the configuration.
    pub seed_label: Option<String>,
    /// Index of the chain whose result is reported below.
    pub selected_chain: usize,
    /// Best energy of the selected chain.
    pub best_energy: Option<f64>,
    /// Marks of the selected chain's best configuration, in identifier order.
    pub best_marks: Vec<Mark>,
    /// Kernel statistics of the selected chain.
    pub statistics: KernelStatistics,
    /// Feedback calls of the selected chain that failed.
    pub feedback_failures: u64,
    /// Every chain, in index order.
    pub chains: Vec<ChainSummary>,
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

impl RunReport {
    /// Summarizes `outcomes`, selecting the best successful chain or the
    /// first chain when every chain failed.
    pub fn from_outcomes(config: &RunConfig, outcomes: &[ChainOutcome]) -> Result<Self, MppError> {
        let selected = best_chain(outcomes).or_else(|| outcomes.first()).ok_or_else(|| {
            MppError::Config(ErrorInfo::new("no-chains", "run produced no chain outcomes"))
        })?;
        let chains = outcomes
            .iter()
            .map(|outcome| ChainSummary {
                chain: outcome.chain,
                seed: outcome.seed,
                iterations: outcome.state.iterations,
                best_energy: finite(outcome.state.best_energy),
                best_marks: outcome.state.best.len(),
                failure: outcome.state.failure.as_ref().map(|err| err.to_string()),
                trajectory_hash: outcome.trajectory_hash.clone(),
            })
            .collect();
        Ok(Self {
            config: config.clone(),
            master_seed: config.seed_policy.master_seed,
            seed_label: config.seed_policy.label.clone(),
            selected_chain: selected.chain,
            best_energy: finite(selected.state.best_energy),
            best_marks: selected.state.best.marks().cloned().collect(),
            statistics: selected.state.statistics.clone(),
            feedback_failures: selected.state.feedback_failures,
            chains,
        })
    }

    /// Writes the report to a JSON file.
    pub fn write(&self, path: &Path) -> Result<(), MppError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                MppError::Serde(
                    ErrorInfo::new("report-mkdir", err.to_string())
                        .with_context("path", parent.display().to_string()),
                )
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|err| {
            MppError::Serde(
                ErrorInfo::new("report-serialize", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        fs::write(path, json).map_err(|err| {
            MppError::Serde(
                ErrorInfo::new("report-write", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    }

    /// Loads a report from disk.
    pub fn load(path: &Path) -> Result<Self, MppError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            MppError::Serde(
                ErrorInfo::new("report-read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            MppError::Serde(
                ErrorInfo::new("report-parse", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    }
}
