use std::fmt;
use std::sync::Arc;

use mpp_core::errors::ErrorInfo;
use mpp_core::{MarkId, MppError};
use mpp_mark::{
    Configuration, LinearScanIndex, Mark, Region, SpatialIndex, VoxelContext, VoxelizedMark,
    VoxelizedMarkMemo,
};
use serde::{Deserialize, Serialize};

use crate::kernel::Proposal;
use crate::total::{Contribution, EnergyDelta, EnergyTotal, PendingMark};

/// Scalar feature of a single voxelized mark.
pub trait IndividualFeature: Send + Sync + fmt::Debug {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;
    /// Evaluates the feature.
    fn evaluate(&self, mark: &Mark, voxelized: &VoxelizedMark) -> f64;
}

/// Scalar feature of an interacting pair of voxelized marks.
pub trait PairwiseFeature: Send + Sync + fmt::Debug {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;
    /// Evaluates the feature. Only called for overlapping pairs.
    fn evaluate(&self, a: (&Mark, &VoxelizedMark), b: (&Mark, &VoxelizedMark)) -> f64;
}

/// Negated difference between the inside and shell means of a channel, so
/// bright marks on a dark background score below zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionContrast {
    /// Stack channel to read.
    pub channel: usize,
}

impl IndividualFeature for RegionContrast {
    fn name(&self) -> &str {
        "region-contrast"
    }

    fn evaluate(&self, _mark: &Mark, voxelized: &VoxelizedMark) -> f64 {
        match (
            voxelized.stats(Region::Inside, self.channel),
            voxelized.stats(Region::Shell, self.channel),
        ) {
            (Some(inside), Some(shell)) => {
                if inside.count == 0 || shell.count == 0 {
                    0.0
                } else {
                    shell.mean - inside.mean
                }
            }
            // channel missing from the stack
            _ => f64::NAN,
        }
    }
}

/// Relative squared deviation of the mark volume from a target volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumePrior {
    /// Preferred area or volume in voxel units.
    pub target: f64,
}

impl IndividualFeature for VolumePrior {
    fn name(&self) -> &str {
        "volume-prior"
    }

    fn evaluate(&self, mark: &Mark, _voxelized: &VoxelizedMark) -> f64 {
        let relative = (mark.volume() - self.target) / self.target;
        relative * relative
    }
}

/// Fixed cost per mark or per interacting pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantCost {
    /// Cost returned for every evaluation.
    pub value: f64,
}

impl IndividualFeature for ConstantCost {
    fn name(&self) -> &str {
        "constant"
    }

    fn evaluate(&self, _mark: &Mark, _voxelized: &VoxelizedMark) -> f64 {
        self.value
    }
}

impl PairwiseFeature for ConstantCost {
    fn name(&self) -> &str {
        "constant"
    }

    fn evaluate(&self, _a: (&Mark, &VoxelizedMark), _b: (&Mark, &VoxelizedMark)) -> f64 {
        self.value
    }
}

/// Shared interior voxels relative to the smaller interior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlapPenalty;

impl PairwiseFeature for OverlapPenalty {
    fn name(&self) -> &str {
        "overlap-penalty"
    }

    fn evaluate(&self, a: (&Mark, &VoxelizedMark), b: (&Mark, &VoxelizedMark)) -> f64 {
        let shared = a.1.shared_voxels(Region::Inside, b.1, Region::Inside) as f64;
        let smaller = a
            .1
            .voxels(Region::Inside)
            .len()
            .min(b.1.voxels(Region::Inside).len()) as f64;
        if smaller == 0.0 {
            0.0
        } else {
            shared / smaller
        }
    }
}

/// Weighted sums of individual and pairwise features.
#[derive(Debug, Clone, Default)]
pub struct EnergyScheme {
    individual: Vec<(f64, Arc<dyn IndividualFeature>)>,
    pairwise: Vec<(f64, Arc<dyn PairwiseFeature>)>,
}

impl EnergyScheme {
    /// Creates a scheme without terms (every energy is zero).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an individual term.
    pub fn with_individual(mut self, weight: f64, feature: Arc<dyn IndividualFeature>) -> Self {
        self.individual.push((weight, feature));
        self
    }

    /// Adds a pairwise term.
    pub fn with_pairwise(mut self, weight: f64, feature: Arc<dyn PairwiseFeature>) -> Self {
        self.pairwise.push((weight, feature));
        self
    }

    /// Individual energy of one mark.
    pub fn individual(
        &self,
        memo: &VoxelizedMarkMemo,
        voxels: &VoxelContext,
    ) -> Result<f64, MppError> {
        let voxelized = memo.voxelized(voxels)?;
        let mut energy = 0.0;
        for (weight, feature) in &self.individual {
            let value = weight * feature.evaluate(memo.mark(), &voxelized);
            if value.is_nan() {
                return Err(MppError::EnergyCalculation(
                    ErrorInfo::new("nan-individual-energy", "individual energy term is NaN")
                        .with_context("mark", memo.id().to_string())
                        .with_context("feature", feature.name()),
                ));
            }
            energy += value;
        }
        Ok(energy)
    }

    /// Pairwise energy of two marks, `None` when they do not interact.
    pub fn pairwise(
        &self,
        a: &VoxelizedMarkMemo,
        b: &VoxelizedMarkMemo,
        voxels: &VoxelContext,
    ) -> Result<Option<f64>, MppError> {
        if self.pairwise.is_empty() {
            return Ok(None);
        }
        let va = a.voxelized(voxels)?;
        let vb = b.voxelized(voxels)?;
        if !va.overlaps(&vb) {
            return Ok(None);
        }
        let mut energy = 0.0;
        for (weight, feature) in &self.pairwise {
            let value =
                weight * feature.evaluate((a.mark(), va.as_ref()), (b.mark(), vb.as_ref()));
            if value.is_nan() {
                return Err(MppError::EnergyCalculation(
                    ErrorInfo::new("nan-pairwise-energy", "pairwise energy term is NaN")
                        .with_context("mark", a.id().to_string())
                        .with_context("partner", b.id().to_string())
                        .with_context("feature", feature.name()),
                ));
            }
            energy += value;
        }
        Ok(Some(energy))
    }
}

/// Energy scheme bound to a stack, voxelizer and spatial index.
#[derive(Clone)]
pub struct EnergyModel {
    /// Weighted feature terms.
    pub scheme: EnergyScheme,
    /// Stack, region scheme and voxelization function.
    pub voxels: VoxelContext,
    /// Coarse neighbour lookup.
    pub index: Arc<dyn SpatialIndex>,
}

impl fmt::Debug for EnergyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyModel")
            .field("scheme", &self.scheme)
            .field("voxels", &self.voxels)
            .finish_non_exhaustive()
    }
}

impl EnergyModel {
    /// Binds a scheme to a voxel context using a [`LinearScanIndex`].
    pub fn new(scheme: EnergyScheme, voxels: VoxelContext) -> Self {
        Self {
            scheme,
            voxels,
            index: Arc::new(LinearScanIndex),
        }
    }

    /// Replaces the spatial index.
    pub fn with_index(mut self, index: Arc<dyn SpatialIndex>) -> Self {
        self.index = index;
        self
    }

    /// Individual energy plus pairwise terms against the marks of
    /// `configuration` accepted by `partner_filter`.
    fn contribution(
        &self,
        configuration: &Configuration,
        memo: &VoxelizedMarkMemo,
        partner_filter: impl Fn(MarkId) -> bool,
    ) -> Result<Contribution, MppError> {
        let individual = self.scheme.individual(memo, &self.voxels)?;
        let mut pairs = Vec::new();
        let bbox = memo.mark().bounding_box(0.0);
        for candidate in self.index.candidates(configuration, &bbox, 0.0) {
            if candidate == memo.id() || !partner_filter(candidate) {
                continue;
            }
            let Some(partner) = configuration.get(candidate) else {
                continue;
            };
            if let Some(value) = self.scheme.pairwise(memo, partner, &self.voxels)? {
                pairs.push((candidate, value));
            }
        }
        Ok(Contribution {
            id: memo.id(),
            individual,
            pairs,
        })
    }

    /// Builds the running total of a configuration, mark by mark in
    /// identifier order so each interacting pair is entered once.
    pub fn initialize(&self, configuration: &Configuration) -> Result<EnergyTotal, MppError> {
        let mut total = EnergyTotal::new();
        for memo in configuration.iter() {
            let contribution =
                self.contribution(configuration, memo, |partner| partner < memo.id())?;
            total.add(contribution)?;
        }
        Ok(total)
    }

    /// Energy change implied by `proposal`, computed without touching
    /// `configuration` beyond filling voxelization caches.
    pub fn evaluate(
        &self,
        configuration: &Configuration,
        total: &EnergyTotal,
        proposal: &Proposal,
    ) -> Result<EnergyDelta, MppError> {
        for id in &proposal.removed {
            if !configuration.contains(*id) {
                return Err(MppError::Inconsistency(
                    ErrorInfo::new("missing-mark", "proposal removes an unknown mark")
                        .with_context("mark", id.to_string()),
                ));
            }
        }
        let removed_energy = total.removal_energy(&proposal.removed);
        let mut added: Vec<PendingMark> = Vec::with_capacity(proposal.added.len());
        for mark in &proposal.added {
            let memo = VoxelizedMarkMemo::new(mark.clone());
            let mut contribution = self.contribution(configuration, &memo, |partner| {
                !proposal.removed.contains(&partner)
            })?;
            for earlier in &added {
                if earlier.memo.mark().bounding_box(0.0).intersects(&mark.bounding_box(0.0)) {
                    if let Some(value) = self.scheme.pairwise(&memo, &earlier.memo, &self.voxels)? {
                        contribution.pairs.push((earlier.memo.id(), value));
                    }
                }
            }
            added.push(PendingMark { memo, contribution });
        }
        let added_energy = added.iter().map(|pending| pending.contribution.energy()).sum();
        let delta = EnergyDelta {
            removed: proposal.removed.clone(),
            added,
            removed_energy,
            added_energy,
        };
        if !delta.delta().is_finite() {
            return Err(MppError::EnergyCalculation(
                ErrorInfo::new("non-finite-delta", "energy change is not a finite number")
                    .with_context("removed", removed_energy.to_string())
                    .with_context("added", added_energy.to_string()),
            ));
        }
        Ok(delta)
    }

    /// Total energy recomputed from scratch over every pair of marks,
    /// bypassing the spatial index.
    pub fn recompute(&self, configuration: &Configuration) -> Result<f64, MppError> {
        let memos: Vec<&VoxelizedMarkMemo> = configuration.iter().collect();
        let mut energy = 0.0;
        for (i, a) in memos.iter().enumerate() {
            energy += self.scheme.individual(a, &self.voxels)?;
            let bbox = a.mark().bounding_box(0.0);
            for b in &memos[i + 1..] {
                if !bbox.intersects(&b.mark().bounding_box(0.0)) {
                    continue;
                }
                if let Some(value) = self.scheme.pairwise(a, b, &self.voxels)? {
                    energy += value;
                }
            }
        }
        Ok(energy)
    }

    /// Compares the running total against a fresh recomputation.
    pub fn audit(
        &self,
        configuration: &Configuration,
        total: &EnergyTotal,
        tolerance: f64,
    ) -> Result<(), MppError> {
        configuration.verify()?;
        if total.len() != configuration.len() {
            return Err(MppError::Inconsistency(
                ErrorInfo::new("energy-book-size", "energy book and configuration disagree on mark count")
                    .with_context("book", total.len().to_string())
                    .with_context("configuration", configuration.len().to_string()),
            ));
        }
        let expected = self.recompute(configuration)?;
        if !expected.is_finite() || !total.total().is_finite() {
            return Err(MppError::Inconsistency(
                ErrorInfo::new("non-finite-energy", "energy total is not a finite number")
                    .with_context("expected", expected.to_string())
                    .with_context("running", total.total().to_string()),
            ));
        }
        let scale = 1.0_f64.max(expected.abs()).max(total.magnitude());
        if (expected - total.total()).abs() > tolerance * scale {
            return Err(MppError::Inconsistency(
                ErrorInfo::new("energy-drift", "running energy total diverged from recomputation")
                    .with_context("expected", expected.to_string())
                    .with_context("running", total.total().to_string()),
            ));
        }
        Ok(())
    }
}
