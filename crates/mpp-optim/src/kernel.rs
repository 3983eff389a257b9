use std::collections::BTreeSet;

use indexmap::IndexMap;
use mpp_core::errors::ErrorInfo;
use mpp_core::{MarkId, MppError, RngHandle};
use mpp_mark::{Configuration, Extent, Mark, MarkShape, Orientation, Point3};
use serde::{Deserialize, Serialize};

/// Broad family of a kernel, used to pair births with deaths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KernelFamily {
    /// Adds a mark.
    Birth,
    /// Removes a mark.
    Death,
    /// Perturbs a mark in place.
    Move,
}

impl KernelFamily {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelFamily::Birth => "birth",
            KernelFamily::Death => "death",
            KernelFamily::Move => "move",
        }
    }
}

/// Candidate transition produced by a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    /// Marks leaving the configuration (a move removes the mark it replaces).
    pub removed: Vec<MarkId>,
    /// Marks entering the configuration.
    pub added: Vec<Mark>,
    /// Proposal ratio `q` (reverse over forward proposal density).
    pub ratio: f64,
    /// Human readable description for debugging.
    pub description: String,
}

impl Proposal {
    /// Identifiers added, removed or changed, ascending and unique.
    pub fn changed_ids(&self) -> Vec<MarkId> {
        let set: BTreeSet<MarkId> = self
            .removed
            .iter()
            .copied()
            .chain(self.added.iter().map(Mark::id))
            .collect();
        set.into_iter().collect()
    }
}

/// Selection probabilities handed to a kernel: its own and that of the
/// kernels able to reverse it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelSelection {
    /// Probability of selecting this kernel.
    pub own: f64,
    /// Probability of selecting a kernel of the reverse family.
    pub reverse: f64,
}

impl KernelSelection {
    // Reverse-over-forward selection factor; omitted when nothing can reverse the move.
    fn factor(&self) -> f64 {
        if self.reverse > 0.0 && self.own > 0.0 {
            self.reverse / self.own
        } else {
            1.0
        }
    }
}

/// Read-only context shared by every proposal.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext {
    /// Extent of the energy stack; births sample centres inside it.
    pub extent: Extent,
    /// Selection probabilities of the proposing kernel.
    pub selection: KernelSelection,
}

/// Samples a new mark uniformly over the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirthKernel {
    /// Inclusive lower and exclusive upper bound of every sampled radius.
    pub radius_range: [f64; 2],
    /// Expected number of marks under the Poisson reference process.
    #[serde(default = "default_intensity")]
    pub intensity: f64,
}

/// Removes a uniformly chosen mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeathKernel {
    /// Expected number of marks under the Poisson reference process.
    #[serde(default = "default_intensity")]
    pub intensity: f64,
}

fn default_intensity() -> f64 {
    10.0
}

/// Symmetric perturbations applied by [`MoveKernel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Perturbation {
    /// Uniform shift in `[-max_shift, max_shift]` per axis.
    Translate {
        /// Largest shift per axis in voxels.
        max_shift: f64,
    },
    /// Log-uniform scaling of each radius in `[1/max_scale, max_scale]`.
    Resize {
        /// Largest scaling factor (> 1).
        max_scale: f64,
    },
    /// Uniform rotation in `[-max_angle, max_angle]`.
    Rotate {
        /// Largest rotation in radians.
        max_angle: f64,
    },
}

/// Replaces a uniformly chosen mark with a perturbed copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveKernel {
    /// How the chosen mark is perturbed.
    pub perturbation: Perturbation,
    /// Smallest radius a resized mark may have.
    #[serde(default = "default_min_radius")]
    pub min_radius: f64,
}

fn default_min_radius() -> f64 {
    0.5
}

/// Stochastic proposal operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Kernel {
    /// See [`BirthKernel`].
    Birth(BirthKernel),
    /// See [`DeathKernel`].
    Death(DeathKernel),
    /// See [`MoveKernel`].
    Move(MoveKernel),
}

impl Kernel {
    /// Family of the kernel.
    pub fn family(&self) -> KernelFamily {
        match self {
            Kernel::Birth(_) => KernelFamily::Birth,
            Kernel::Death(_) => KernelFamily::Death,
            Kernel::Move(_) => KernelFamily::Move,
        }
    }

    /// Proposes a transition from `current`. Never mutates `current`.
    ///
    /// Draws are consumed from `rng` in a fixed order per kernel, so the
    /// result is a pure function of `current` and the RNG state.
    pub fn propose(
        &self,
        current: &Configuration,
        context: &ProposalContext,
        rng: &mut RngHandle,
    ) -> Result<Proposal, MppError> {
        match self {
            Kernel::Birth(kernel) => kernel.propose(current, context, rng),
            Kernel::Death(kernel) => kernel.propose(current, context, rng),
            Kernel::Move(kernel) => kernel.propose(current, rng),
        }
    }

    /// Checks the kernel parameters.
    pub fn validate(&self) -> Result<(), MppError> {
        let invalid = |code: &str, message: &str| {
            Err(MppError::Config(ErrorInfo::new(code, message)))
        };
        match self {
            Kernel::Birth(kernel) => {
                let [low, high] = kernel.radius_range;
                if !(low > 0.0 && high >= low && high.is_finite()) {
                    return invalid("birth-radius-range", "radius range must satisfy 0 < low <= high");
                }
                if !(kernel.intensity > 0.0 && kernel.intensity.is_finite()) {
                    return invalid("birth-intensity", "intensity must be positive");
                }
            }
            Kernel::Death(kernel) => {
                if !(kernel.intensity > 0.0 && kernel.intensity.is_finite()) {
                    return invalid("death-intensity", "intensity must be positive");
                }
            }
            Kernel::Move(kernel) => {
                let ok = match kernel.perturbation {
                    Perturbation::Translate { max_shift } => max_shift > 0.0 && max_shift.is_finite(),
                    Perturbation::Resize { max_scale } => max_scale > 1.0 && max_scale.is_finite(),
                    Perturbation::Rotate { max_angle } => max_angle > 0.0 && max_angle.is_finite(),
                };
                if !ok {
                    return invalid("move-perturbation", "perturbation bound out of range");
                }
            }
        }
        Ok(())
    }
}

fn proposal_failure(code: &str, message: &str) -> MppError {
    MppError::Proposal(ErrorInfo::new(code, message))
}

fn pick_existing(current: &Configuration, rng: &mut RngHandle) -> Result<MarkId, MppError> {
    if current.is_empty() {
        return Err(proposal_failure(
            "empty-configuration",
            "no mark available to select",
        ));
    }
    let index = rng.next_index(current.len());
    current
        .id_at(index)
        .ok_or_else(|| proposal_failure("selection-out-of-range", "sampled index has no mark"))
}

impl BirthKernel {
    fn propose(
        &self,
        current: &Configuration,
        context: &ProposalContext,
        rng: &mut RngHandle,
    ) -> Result<Proposal, MppError> {
        let extent = context.extent;
        let id = current.next_id();
        let [low, high] = self.radius_range;
        let x = rng.next_range(0.0, (extent.x.max(1) - 1) as f64);
        let y = rng.next_range(0.0, (extent.y.max(1) - 1) as f64);
        let built = if extent.is_planar() {
            let radii = [rng.next_range(low, high), rng.next_range(low, high)];
            let angle = rng.next_range(0.0, std::f64::consts::PI);
            Mark::ellipse(id, Point3::new(x, y, 0.0), radii, angle)
        } else {
            let z = rng.next_range(0.0, (extent.z - 1) as f64);
            let radii = [
                rng.next_range(low, high),
                rng.next_range(low, high),
                rng.next_range(low, high),
            ];
            let orientation = Orientation {
                yaw: rng.next_range(0.0, std::f64::consts::PI),
                pitch: rng.next_range(0.0, std::f64::consts::PI),
                roll: rng.next_range(0.0, std::f64::consts::PI),
            };
            Mark::ellipsoid(id, Point3::new(x, y, z), radii, orientation)
        };
        let mark = built.map_err(|err| proposal_failure("birth-geometry", &err.to_string()))?;

        let ratio =
            context.selection.factor() * self.intensity / (current.len() as f64 + 1.0);
        Ok(Proposal {
            removed: Vec::new(),
            description: format!("birth:{id}@({x:.1},{y:.1})"),
            added: vec![mark],
            ratio,
        })
    }
}

impl DeathKernel {
    fn propose(
        &self,
        current: &Configuration,
        context: &ProposalContext,
        rng: &mut RngHandle,
    ) -> Result<Proposal, MppError> {
        let id = pick_existing(current, rng)?;
        let ratio = context.selection.factor() * current.len() as f64 / self.intensity;
        Ok(Proposal {
            removed: vec![id],
            added: Vec::new(),
            ratio,
            description: format!("death:{id}"),
        })
    }
}

impl MoveKernel {
    fn propose(&self, current: &Configuration, rng: &mut RngHandle) -> Result<Proposal, MppError> {
        let id = pick_existing(current, rng)?;
        let mark = current
            .mark(id)
            .ok_or_else(|| proposal_failure("selection-out-of-range", "sampled mark vanished"))?;
        let planar = matches!(mark.shape(), MarkShape::Ellipse { .. });
        let (moved, ratio, label) = match self.perturbation {
            Perturbation::Translate { max_shift } => {
                let dx = rng.next_range(-max_shift, max_shift);
                let dy = rng.next_range(-max_shift, max_shift);
                let dz = if planar {
                    0.0
                } else {
                    rng.next_range(-max_shift, max_shift)
                };
                (mark.translated(dx, dy, dz), 1.0, "translate")
            }
            Perturbation::Resize { max_scale } => {
                let bound = max_scale.ln();
                let axes = if planar { 2 } else { 3 };
                let mut factors = [1.0; 3];
                for factor in factors.iter_mut().take(axes) {
                    *factor = rng.next_range(-bound, bound).exp();
                }
                // Jacobian of the log-uniform scaling.
                let ratio = factors.iter().product::<f64>();
                (mark.scaled(factors), ratio, "resize")
            }
            Perturbation::Rotate { max_angle } => {
                let delta = rng.next_range(-max_angle, max_angle);
                (mark.rotated(delta), 1.0, "rotate")
            }
        };
        let moved = moved.map_err(|err| proposal_failure("move-geometry", &err.to_string()))?;
        if !within_radius_floor(&moved, self.min_radius) {
            return Err(proposal_failure(
                "degenerate-radius",
                "perturbed mark falls below the minimum radius",
            ));
        }
        Ok(Proposal {
            removed: vec![id],
            added: vec![moved],
            ratio,
            description: format!("{label}:{id}"),
        })
    }
}

fn within_radius_floor(mark: &Mark, min_radius: f64) -> bool {
    match mark.shape() {
        MarkShape::Ellipse { radii, .. } => radii.iter().all(|r| *r >= min_radius),
        MarkShape::Ellipsoid { radii, .. } => radii.iter().all(|r| *r >= min_radius),
    }
}

/// One configured kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelEntry {
    /// Selection weight (unnormalized).
    pub weight: f64,
    /// The operator.
    pub kernel: Kernel,
}

/// Named, weighted kernels. The kernel identifier is its insertion index.
#[derive(Debug, Clone, Default)]
pub struct KernelSet {
    entries: IndexMap<String, KernelEntry>,
    total_weight: f64,
}

impl KernelSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a kernel under a unique name.
    pub fn with(mut self, name: impl Into<String>, weight: f64, kernel: Kernel) -> Result<Self, MppError> {
        self.push(name, weight, kernel)?;
        Ok(self)
    }

    /// Adds a kernel under a unique name.
    pub fn push(&mut self, name: impl Into<String>, weight: f64, kernel: Kernel) -> Result<usize, MppError> {
        let name = name.into();
        if !(weight >= 0.0 && weight.is_finite()) {
            return Err(MppError::Config(
                ErrorInfo::new("kernel-weight", "kernel weight must be finite and non-negative")
                    .with_context("kernel", name),
            ));
        }
        if self.entries.contains_key(&name) {
            return Err(MppError::Config(
                ErrorInfo::new("duplicate-kernel", "kernel names must be unique")
                    .with_context("kernel", name),
            ));
        }
        kernel
            .validate()
            .map_err(|err| err.with_context("kernel", name.clone()))?;
        self.total_weight += weight;
        let (index, _) = self.entries.insert_full(name, KernelEntry { weight, kernel });
        Ok(index)
    }

    /// Number of kernels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no kernel is configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Kernel names in identifier order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Name and entry for a kernel identifier.
    pub fn get(&self, id: usize) -> Option<(&str, &KernelEntry)> {
        self.entries
            .get_index(id)
            .map(|(name, entry)| (name.as_str(), entry))
    }

    /// Normalized selection probability of kernel `id`.
    pub fn probability(&self, id: usize) -> f64 {
        match self.entries.get_index(id) {
            Some((_, entry)) if self.total_weight > 0.0 => entry.weight / self.total_weight,
            _ => 0.0,
        }
    }

    fn family_probability(&self, family: KernelFamily) -> f64 {
        (0..self.len())
            .filter(|id| {
                self.get(*id)
                    .map(|(_, entry)| entry.kernel.family() == family)
                    .unwrap_or(false)
            })
            .map(|id| self.probability(id))
            .sum()
    }

    /// Own and reverse selection probabilities of kernel `id`.
    pub fn selection(&self, id: usize) -> KernelSelection {
        let own = self.probability(id);
        let reverse = match self.get(id).map(|(_, entry)| entry.kernel.family()) {
            Some(KernelFamily::Birth) => self.family_probability(KernelFamily::Death),
            Some(KernelFamily::Death) => self.family_probability(KernelFamily::Birth),
            Some(KernelFamily::Move) => own,
            None => 0.0,
        };
        KernelSelection { own, reverse }
    }

    /// Checks that at least one kernel can be selected.
    pub fn validate(&self) -> Result<(), MppError> {
        if self.total_weight > 0.0 {
            Ok(())
        } else {
            Err(MppError::Config(
                ErrorInfo::new("no-kernels", "kernel weights must sum to a positive value")
                    .with_hint("configure at least one kernel with a positive weight"),
            ))
        }
    }

    /// Weighted random choice of a kernel identifier; consumes one draw.
    pub fn select(&self, rng: &mut RngHandle) -> Result<usize, MppError> {
        self.validate()?;
        let target = rng.next_uniform() * self.total_weight;
        let mut cumulative = 0.0;
        let mut last_positive = 0;
        for (id, entry) in self.entries.values().enumerate() {
            if entry.weight <= 0.0 {
                continue;
            }
            cumulative += entry.weight;
            last_positive = id;
            if target < cumulative {
                return Ok(id);
            }
        }
        Ok(last_positive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disc(id: u64, x: f64, y: f64, r: f64) -> Mark {
        Mark::ellipse(MarkId::from_raw(id), Point3::new(x, y, 0.0), [r, r], 0.0).unwrap()
    }

    fn context(selection: KernelSelection) -> ProposalContext {
        ProposalContext {
            extent: Extent::new(40, 40, 1),
            selection,
        }
    }

    const NEUTRAL: KernelSelection = KernelSelection { own: 1.0, reverse: 0.0 };

    #[test]
    fn death_fails_on_empty_configuration() {
        let kernel = Kernel::Death(DeathKernel { intensity: 5.0 });
        let mut rng = RngHandle::from_seed(1);
        let err = kernel
            .propose(&Configuration::new(), &context(NEUTRAL), &mut rng)
            .unwrap_err();
        assert!(matches!(err, MppError::Proposal(_)));
        assert_eq!(err.info().code, "empty-configuration");
    }

    #[test]
    fn birth_uses_fresh_identifier_and_leaves_input_untouched() {
        let current = Configuration::from_marks([disc(4, 10.0, 10.0, 2.0)]).unwrap();
        let kernel = Kernel::Birth(BirthKernel {
            radius_range: [2.0, 4.0],
            intensity: 8.0,
        });
        let mut rng = RngHandle::from_seed(3);
        let proposal = kernel.propose(&current, &context(NEUTRAL), &mut rng).unwrap();
        assert_eq!(proposal.added.len(), 1);
        assert_eq!(proposal.added[0].id(), MarkId::from_raw(5));
        assert!((proposal.ratio - 4.0).abs() < 1e-12);
        assert_eq!(current.len(), 1);
        assert_eq!(proposal.changed_ids(), vec![MarkId::from_raw(5)]);
    }

    #[test]
    fn birth_death_ratios_include_selection_factor() {
        let current = Configuration::from_marks([disc(0, 5.0, 5.0, 2.0), disc(1, 20.0, 20.0, 2.0)]).unwrap();
        let selection = KernelSelection { own: 0.25, reverse: 0.5 };
        let mut rng = RngHandle::from_seed(8);
        let birth = Kernel::Birth(BirthKernel {
            radius_range: [1.0, 2.0],
            intensity: 6.0,
        })
        .propose(&current, &context(selection), &mut rng)
        .unwrap();
        assert!((birth.ratio - 2.0 * 6.0 / 3.0).abs() < 1e-12);
        let death = Kernel::Death(DeathKernel { intensity: 6.0 })
            .propose(&current, &context(selection), &mut rng)
            .unwrap();
        assert!((death.ratio - 2.0 * 2.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn move_keeps_identifier_and_is_deterministic() {
        let current = Configuration::from_marks([disc(2, 10.0, 10.0, 3.0)]).unwrap();
        let kernel = Kernel::Move(MoveKernel {
            perturbation: Perturbation::Translate { max_shift: 2.0 },
            min_radius: 0.5,
        });
        let a = kernel
            .propose(&current, &context(NEUTRAL), &mut RngHandle::from_seed(11))
            .unwrap();
        let b = kernel
            .propose(&current, &context(NEUTRAL), &mut RngHandle::from_seed(11))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.removed, vec![MarkId::from_raw(2)]);
        assert_eq!(a.added[0].id(), MarkId::from_raw(2));
        assert_eq!(a.ratio, 1.0);
    }

    #[test]
    fn kernel_set_rejects_bad_entries() {
        let birth = Kernel::Birth(BirthKernel {
            radius_range: [1.0, 2.0],
            intensity: 1.0,
        });
        let mut set = KernelSet::new();
        assert!(set.push("birth", -1.0, birth.clone()).is_err());
        set.push("birth", 1.0, birth.clone()).unwrap();
        assert!(set.push("birth", 1.0, birth).is_err());
        let bad = Kernel::Move(MoveKernel {
            perturbation: Perturbation::Resize { max_scale: 0.5 },
            min_radius: 0.5,
        });
        assert!(set.push("resize", 1.0, bad).is_err());
        assert!(KernelSet::new().validate().is_err());
    }

    #[test]
    fn selection_respects_weights() {
        let set = KernelSet::new()
            .with(
                "birth",
                3.0,
                Kernel::Birth(BirthKernel {
                    radius_range: [1.0, 2.0],
                    intensity: 1.0,
                }),
            )
            .unwrap()
            .with("death", 1.0, Kernel::Death(DeathKernel { intensity: 1.0 }))
            .unwrap()
            .with(
                "idle",
                0.0,
                Kernel::Move(MoveKernel {
                    perturbation: Perturbation::Rotate { max_angle: 0.1 },
                    min_radius: 0.5,
                }),
            )
            .unwrap();
        let mut rng = RngHandle::from_seed(5);
        let mut counts = [0usize; 3];
        for _ in 0..4000 {
            counts[set.select(&mut rng).unwrap()] += 1;
        }
        assert_eq!(counts[2], 0);
        let share = counts[0] as f64 / 4000.0;
        assert!((share - 0.75).abs() < 0.05, "birth share {share}");
        let selection = set.selection(0);
        assert!((selection.own - 0.75).abs() < 1e-12);
        assert!((selection.reverse - 0.25).abs() < 1e-12);
    }
}
