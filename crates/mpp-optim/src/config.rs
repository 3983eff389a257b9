use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mpp_core::errors::ErrorInfo;
use mpp_core::MppError;
use mpp_mark::RegionScheme;
use serde::{Deserialize, Serialize};

use crate::energy::{
    ConstantCost, EnergyScheme, IndividualFeature, OverlapPenalty, PairwiseFeature,
    RegionContrast, VolumePrior,
};
use crate::kernel::{BirthKernel, DeathKernel, Kernel, KernelSet, MoveKernel, Perturbation};
use crate::optimizer::RunOptions;
use crate::schedule::ScheduleConfig;
use crate::termination::{AllOf, EnergyBelow, MaxIterations, Stagnation, WallClockLimit};

/// YAML-configurable parameters of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Iteration budget of every chain.
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Annealing schedule.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Proposal kernels in identifier order.
    #[serde(default = "default_kernels")]
    pub kernels: Vec<KernelConfig>,
    /// Weighted energy terms.
    #[serde(default)]
    pub energy: EnergyConfig,
    /// Region-membership scheme used by the voxelizer.
    #[serde(default)]
    pub region: RegionScheme,
    /// Additional stopping rules combined with the iteration budget.
    #[serde(default)]
    pub termination: TerminationConfig,
    /// Master seed and label.
    #[serde(default)]
    pub seed_policy: SeedPolicy,
    /// Number of independent chains.
    #[serde(default = "default_chains")]
    pub chains: usize,
    /// Audit cadence and failure policy.
    #[serde(flatten)]
    pub options: RunOptions,
    /// Feedback outputs.
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

fn default_iterations() -> u64 {
    10_000
}

fn default_chains() -> usize {
    1
}

fn default_kernels() -> Vec<KernelConfig> {
    vec![
        KernelConfig {
            name: "birth".to_string(),
            weight: 1.0,
            kind: Kernel::Birth(BirthKernel {
                radius_range: [2.0, 6.0],
                intensity: 10.0,
            }),
        },
        KernelConfig {
            name: "death".to_string(),
            weight: 1.0,
            kind: Kernel::Death(DeathKernel { intensity: 10.0 }),
        },
        KernelConfig {
            name: "translate".to_string(),
            weight: 2.0,
            kind: Kernel::Move(MoveKernel {
                perturbation: Perturbation::Translate { max_shift: 1.5 },
                min_radius: 0.5,
            }),
        },
    ]
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            schedule: ScheduleConfig::default(),
            kernels: default_kernels(),
            energy: EnergyConfig::default(),
            region: RegionScheme::default(),
            termination: TerminationConfig::default(),
            seed_policy: SeedPolicy::default(),
            chains: default_chains(),
            options: RunOptions::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

/// One named, weighted kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Name used in statistics and reports.
    pub name: String,
    /// Unnormalized selection weight.
    pub weight: f64,
    /// Kernel parameters.
    pub kind: Kernel,
}

/// Weighted energy terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyConfig {
    /// Terms evaluated per mark.
    #[serde(default = "default_individual")]
    pub individual: Vec<Weighted<IndividualTerm>>,
    /// Terms evaluated per interacting pair.
    #[serde(default = "default_pairwise")]
    pub pairwise: Vec<Weighted<PairwiseTerm>>,
}

fn default_individual() -> Vec<Weighted<IndividualTerm>> {
    vec![
        Weighted {
            weight: 1.0,
            term: IndividualTerm::RegionContrast { channel: 0 },
        },
        Weighted {
            weight: 0.1,
            term: IndividualTerm::ConstantCost { value: 1.0 },
        },
    ]
}

fn default_pairwise() -> Vec<Weighted<PairwiseTerm>> {
    vec![Weighted {
        weight: 2.0,
        term: PairwiseTerm::OverlapPenalty,
    }]
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            individual: default_individual(),
            pairwise: default_pairwise(),
        }
    }
}

/// A term together with its weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weighted<T> {
    /// Multiplier applied to the term.
    pub weight: f64,
    /// The term.
    pub term: T,
}

/// Individual energy terms selectable from YAML.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IndividualTerm {
    /// See [`RegionContrast`].
    RegionContrast {
        /// Stack channel read by the term.
        channel: usize,
    },
    /// See [`VolumePrior`].
    VolumePrior {
        /// Preferred mark volume.
        target: f64,
    },
    /// See [`ConstantCost`].
    ConstantCost {
        /// Cost per mark.
        value: f64,
    },
}

impl IndividualTerm {
    fn build(&self) -> Arc<dyn IndividualFeature> {
        match *self {
            IndividualTerm::RegionContrast { channel } => Arc::new(RegionContrast { channel }),
            IndividualTerm::VolumePrior { target } => Arc::new(VolumePrior { target }),
            IndividualTerm::ConstantCost { value } => Arc::new(ConstantCost { value }),
        }
    }
}

/// Pairwise energy terms selectable from YAML.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PairwiseTerm {
    /// See [`OverlapPenalty`].
    OverlapPenalty,
    /// See [`ConstantCost`].
    ConstantCost {
        /// Cost per interacting pair.
        value: f64,
    },
}

impl PairwiseTerm {
    fn build(&self) -> Arc<dyn PairwiseFeature> {
        match *self {
            PairwiseTerm::OverlapPenalty => Arc::new(OverlapPenalty),
            PairwiseTerm::ConstantCost { value } => Arc::new(ConstantCost { value }),
        }
    }
}

/// Stopping rules beyond the iteration budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminationConfig {
    /// Stop once the energy drops below this value.
    #[serde(default)]
    pub min_energy: Option<f64>,
    /// Stop when the energy stops improving.
    #[serde(default)]
    pub stagnation: Option<StagnationConfig>,
    /// Stop after this many seconds of wall-clock time.
    #[serde(default)]
    pub wall_clock_seconds: Option<f64>,
}

/// Parameters of [`Stagnation`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagnationConfig {
    /// Iterations without improvement tolerated.
    pub window: u64,
    /// Smallest decrease regarded as an improvement.
    #[serde(default)]
    pub min_improvement: f64,
}

/// Deterministic seeding configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// Master seed; chain seeds are derived from it.
    #[serde(default = "default_master_seed")]
    pub master_seed: u64,
    /// Optional label echoed in reports.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_master_seed() -> u64 {
    0x5EED_0F_AC1D_u64
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            master_seed: default_master_seed(),
            label: None,
        }
    }
}

/// Feedback outputs requested by the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Log an aggregate line every this many iterations; zero disables it.
    #[serde(default = "default_log_every")]
    pub log_every: u64,
    /// Write `iterations.csv` for the best chain.
    #[serde(default = "default_csv")]
    pub csv: bool,
}

fn default_log_every() -> u64 {
    1_000
}

fn default_csv() -> bool {
    true
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            log_every: default_log_every(),
            csv: default_csv(),
        }
    }
}

fn config_error(code: &str, message: impl Into<String>) -> MppError {
    MppError::Config(ErrorInfo::new(code, message))
}

fn finite_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

impl RunConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, MppError> {
        let config: RunConfig = serde_yaml::from_str(contents)
            .map_err(|err| config_error("yaml-parse", err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn load(path: &Path) -> Result<Self, MppError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            MppError::Config(
                ErrorInfo::new("config-read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&contents).map_err(|err| err.with_context("path", path.display().to_string()))
    }

    /// Serializes the configuration back to YAML.
    pub fn to_yaml_string(&self) -> Result<String, MppError> {
        serde_yaml::to_string(self).map_err(|err| {
            MppError::Serde(ErrorInfo::new("yaml-serialize", err.to_string()))
        })
    }

    /// Checks parameters that serde cannot.
    pub fn validate(&self) -> Result<(), MppError> {
        if self.chains == 0 {
            return Err(config_error("chains", "at least one chain is required"));
        }
        self.build_kernels()?;
        self.validate_schedule()?;
        for entry in &self.energy.individual {
            if !entry.weight.is_finite() {
                return Err(config_error("energy-weight", "individual weights must be finite"));
            }
            match entry.term {
                IndividualTerm::VolumePrior { target } if !(target > 0.0 && target.is_finite()) => {
                    return Err(config_error("volume-target", "volume target must be positive"));
                }
                IndividualTerm::ConstantCost { value } if !value.is_finite() => {
                    return Err(config_error("constant-cost", "constant cost must be finite"));
                }
                _ => {}
            }
        }
        for entry in &self.energy.pairwise {
            if !entry.weight.is_finite() {
                return Err(config_error("energy-weight", "pairwise weights must be finite"));
            }
            if let PairwiseTerm::ConstantCost { value } = entry.term {
                if !value.is_finite() {
                    return Err(config_error("constant-cost", "constant cost must be finite"));
                }
            }
        }
        let region = &self.region;
        if !finite_non_negative(region.shell_width) || region.histogram_bins == 0 {
            return Err(config_error(
                "region-scheme",
                "shell width must be non-negative and at least one histogram bin is required",
            ));
        }
        if !(region.histogram_range[1] > region.histogram_range[0]) {
            return Err(config_error("region-scheme", "histogram range must be increasing"));
        }
        if let Some(stagnation) = &self.termination.stagnation {
            if stagnation.window == 0 || !finite_non_negative(stagnation.min_improvement) {
                return Err(config_error("stagnation", "stagnation window must be positive"));
            }
        }
        if let Some(seconds) = self.termination.wall_clock_seconds {
            if !(seconds > 0.0 && seconds.is_finite()) {
                return Err(config_error("wall-clock", "wall-clock limit must be positive"));
            }
        }
        if !(self.options.audit_tolerance > 0.0) {
            return Err(config_error("audit-tolerance", "audit tolerance must be positive"));
        }
        Ok(())
    }

    fn validate_schedule(&self) -> Result<(), MppError> {
        let valid = match self.schedule {
            ScheduleConfig::Constant { temperature } => finite_non_negative(temperature),
            ScheduleConfig::Geometric {
                initial,
                ratio,
                minimum,
            } => {
                finite_non_negative(initial)
                    && ratio > 0.0
                    && ratio <= 1.0
                    && finite_non_negative(minimum)
            }
            ScheduleConfig::Linear {
                initial, target, ..
            } => finite_non_negative(initial) && finite_non_negative(target) && target <= initial,
        };
        if valid {
            Ok(())
        } else {
            Err(config_error("schedule", "schedule must be non-negative and non-increasing")
                .with_context("schedule", format!("{:?}", self.schedule)))
        }
    }

    /// Builds the kernel set, validating every kernel.
    pub fn build_kernels(&self) -> Result<KernelSet, MppError> {
        let mut kernels = KernelSet::new();
        for entry in &self.kernels {
            kernels
                .push(entry.name.clone(), entry.weight, entry.kind.clone())
                .map_err(|err| err.with_context("kernel", entry.name.clone()))?;
        }
        kernels.validate()?;
        Ok(kernels)
    }

    /// Builds the weighted energy scheme.
    pub fn build_scheme(&self) -> EnergyScheme {
        let scheme = self
            .energy
            .individual
            .iter()
            .fold(EnergyScheme::new(), |scheme, entry| {
                scheme.with_individual(entry.weight, entry.term.build())
            });
        self.energy
            .pairwise
            .iter()
            .fold(scheme, |scheme, entry| scheme.with_pairwise(entry.weight, entry.term.build()))
    }

    /// Iteration budget combined with every configured stopping rule.
    pub fn build_termination(&self) -> AllOf {
        let mut condition = AllOf::new().with(MaxIterations {
            limit: self.iterations,
        });
        if let Some(threshold) = self.termination.min_energy {
            condition = condition.with(EnergyBelow { threshold });
        }
        if let Some(stagnation) = self.termination.stagnation {
            condition = condition.with(Stagnation::new(stagnation.window, stagnation.min_improvement));
        }
        if let Some(seconds) = self.termination.wall_clock_seconds {
            condition = condition.with(WallClockLimit::new(Duration::from_secs_f64(seconds)));
        }
        condition
    }
}
