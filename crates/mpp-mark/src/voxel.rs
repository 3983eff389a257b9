use std::fmt;
use std::sync::Arc;

use mpp_core::errors::ErrorInfo;
use mpp_core::MppError;
use serde::{Deserialize, Serialize};

use crate::geometry::{Point3, Voxel};
use crate::mark::Mark;
use crate::stack::EnergyStack;

/// Named partitions of the voxels belonging to a mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    /// Voxels inside the shape.
    Inside,
    /// Voxels within `shell_width` outside the shape boundary.
    Shell,
}

/// Region-membership scheme: how voxels are classified and summarised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionScheme {
    /// Thickness of the shell region in voxels.
    #[serde(default = "default_shell_width")]
    pub shell_width: f64,
    /// Number of histogram bins per region and channel.
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,
    /// Value range covered by the histogram bins; outliers are clamped.
    #[serde(default = "default_histogram_range")]
    pub histogram_range: [f64; 2],
}

fn default_shell_width() -> f64 {
    2.0
}

fn default_histogram_bins() -> usize {
    16
}

fn default_histogram_range() -> [f64; 2] {
    [0.0, 1.0]
}

impl Default for RegionScheme {
    fn default() -> Self {
        Self {
            shell_width: default_shell_width(),
            histogram_bins: default_histogram_bins(),
            histogram_range: default_histogram_range(),
        }
    }
}

/// Fixed-range histogram of voxel intensities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Lower bound of the first bin.
    pub low: f64,
    /// Upper bound of the last bin.
    pub high: f64,
    /// Counts per bin.
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Creates an empty histogram with `bins` bins over `[low, high)`.
    pub fn new(bins: usize, low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            counts: vec![0; bins.max(1)],
        }
    }

    /// Adds one observation, clamping it into the bin range.
    pub fn add(&mut self, value: f64) {
        let bins = self.counts.len();
        let width = (self.high - self.low).max(f64::EPSILON);
        let position = ((value - self.low) / width * bins as f64).floor();
        let index = if position.is_nan() || position < 0.0 {
            0
        } else {
            (position as usize).min(bins - 1)
        };
        self.counts[index] += 1;
    }

    /// Total number of observations.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Summary statistics of one channel over one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    /// Number of voxels.
    pub count: usize,
    /// Mean intensity (0 for empty regions).
    pub mean: f64,
    /// Population variance of the intensity.
    pub variance: f64,
    /// Intensity histogram.
    pub histogram: Histogram,
}

impl RegionStats {
    fn collect(values: impl Iterator<Item = f64>, scheme: &RegionScheme) -> Self {
        let mut histogram = Histogram::new(
            scheme.histogram_bins,
            scheme.histogram_range[0],
            scheme.histogram_range[1],
        );
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for value in values {
            count += 1;
            sum += value;
            sum_sq += value * value;
            histogram.add(value);
        }
        let (mean, variance) = if count == 0 {
            (0.0, 0.0)
        } else {
            let mean = sum / count as f64;
            (mean, (sum_sq / count as f64 - mean * mean).max(0.0))
        };
        Self {
            count,
            mean,
            variance,
            histogram,
        }
    }
}

/// Raw voxel partition produced by a [`Voxelizer`]. Lists are sorted and
/// free of duplicates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VoxelRegions {
    /// Voxels inside the mark.
    pub inside: Vec<Voxel>,
    /// Voxels in the shell around the mark.
    pub shell: Vec<Voxel>,
}

/// Maps a mark onto the voxel grid of a stack.
pub trait Voxelizer: Send + Sync {
    /// Partitions the voxels covered by `mark` according to `scheme`.
    fn voxelize(
        &self,
        mark: &Mark,
        stack: &EnergyStack,
        scheme: &RegionScheme,
    ) -> Result<VoxelRegions, MppError>;
}

/// Voxelizer that scans the dilated bounding box and classifies each voxel
/// centre with the mark's quadratic form.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridVoxelizer;

impl Voxelizer for GridVoxelizer {
    fn voxelize(
        &self,
        mark: &Mark,
        stack: &EnergyStack,
        scheme: &RegionScheme,
    ) -> Result<VoxelRegions, MppError> {
        if !(scheme.shell_width.is_finite() && scheme.shell_width >= 0.0) {
            return Err(MppError::Geometry(
                ErrorInfo::new("invalid-shell", "shell width must be finite and non-negative")
                    .with_context("shell_width", scheme.shell_width.to_string()),
            ));
        }
        let mut regions = VoxelRegions::default();
        let bbox = match mark.bounding_box(scheme.shell_width).clip(&stack.extent()) {
            Some(bbox) => bbox,
            None => return Ok(regions),
        };
        // bbox.voxels() is x fastest; sort keys below match that order.
        for voxel in bbox.voxels() {
            let point = Point3::of_voxel(voxel);
            if mark.scaled_distance(&point, 0.0) <= 1.0 {
                regions.inside.push(voxel);
            } else if scheme.shell_width > 0.0
                && mark.scaled_distance(&point, scheme.shell_width) <= 1.0
            {
                regions.shell.push(voxel);
            }
        }
        Ok(regions)
    }
}

/// Voxelized representation of a mark with per-region, per-channel statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelizedMark {
    regions: VoxelRegions,
    inside_stats: Vec<RegionStats>,
    shell_stats: Vec<RegionStats>,
}

impl VoxelizedMark {
    /// Computes statistics for every channel of `stack` over `regions`.
    pub fn build(regions: VoxelRegions, stack: &EnergyStack, scheme: &RegionScheme) -> Self {
        let stats_for = |voxels: &[Voxel]| -> Vec<RegionStats> {
            (0..stack.num_channels())
                .map(|channel| {
                    RegionStats::collect(
                        voxels.iter().filter_map(|v| stack.value(channel, *v)),
                        scheme,
                    )
                })
                .collect()
        };
        let inside_stats = stats_for(&regions.inside);
        let shell_stats = stats_for(&regions.shell);
        Self {
            regions,
            inside_stats,
            shell_stats,
        }
    }

    /// Voxels of a region, sorted in z, y, x order.
    pub fn voxels(&self, region: Region) -> &[Voxel] {
        match region {
            Region::Inside => &self.regions.inside,
            Region::Shell => &self.regions.shell,
        }
    }

    /// Statistics of `channel` over `region`.
    pub fn stats(&self, region: Region, channel: usize) -> Option<&RegionStats> {
        match region {
            Region::Inside => self.inside_stats.get(channel),
            Region::Shell => self.shell_stats.get(channel),
        }
    }

    /// Number of voxels in `region` of `self` that also lie in `other_region` of `other`.
    pub fn shared_voxels(&self, region: Region, other: &VoxelizedMark, other_region: Region) -> usize {
        count_shared(self.voxels(region), other.voxels(other_region))
    }

    /// Precise interaction test: the interiors share at least one voxel.
    pub fn overlaps(&self, other: &VoxelizedMark) -> bool {
        self.shared_voxels(Region::Inside, other, Region::Inside) > 0
    }
}

fn zyx(voxel: &Voxel) -> [usize; 3] {
    [voxel[2], voxel[1], voxel[0]]
}

fn count_shared(a: &[Voxel], b: &[Voxel]) -> usize {
    let (mut i, mut j, mut shared) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match zyx(&a[i]).cmp(&zyx(&b[j])) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    shared
}

/// Everything a memo needs to voxelize a mark: the shared stack, the region
/// scheme and the voxelization function.
#[derive(Clone)]
pub struct VoxelContext {
    /// Energy field, shared read-only between chains.
    pub stack: Arc<EnergyStack>,
    /// Region-membership scheme.
    pub scheme: RegionScheme,
    /// Voxelization function.
    pub voxelizer: Arc<dyn Voxelizer>,
}

impl VoxelContext {
    /// Bundles a stack and scheme with the default [`GridVoxelizer`].
    pub fn new(stack: Arc<EnergyStack>, scheme: RegionScheme) -> Self {
        Self {
            stack,
            scheme,
            voxelizer: Arc::new(GridVoxelizer),
        }
    }

    /// Replaces the voxelization function.
    pub fn with_voxelizer(mut self, voxelizer: Arc<dyn Voxelizer>) -> Self {
        self.voxelizer = voxelizer;
        self
    }

    /// Same stack and voxelizer instances with an equal region scheme.
    pub fn is_same(&self, other: &VoxelContext) -> bool {
        Arc::ptr_eq(&self.stack, &other.stack)
            && std::ptr::eq(
                Arc::as_ptr(&self.voxelizer) as *const (),
                Arc::as_ptr(&other.voxelizer) as *const (),
            )
            && self.scheme == other.scheme
    }

    /// Voxelizes `mark` and builds its statistics. Uncached.
    pub fn voxelize(&self, mark: &Mark) -> Result<VoxelizedMark, MppError> {
        let regions = self
            .voxelizer
            .voxelize(mark, &self.stack, &self.scheme)
            .map_err(|err| {
                MppError::EnergyCalculation(
                    ErrorInfo::new("voxelization-failed", err.to_string())
                        .with_context("mark", mark.id().to_string()),
                )
            })?;
        Ok(VoxelizedMark::build(regions, &self.stack, &self.scheme))
    }
}

impl fmt::Debug for VoxelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoxelContext")
            .field("extent", &self.stack.extent())
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Extent;
    use mpp_core::MarkId;

    fn flat_stack(extent: Extent, value: f64) -> EnergyStack {
        EnergyStack::new(extent, vec![vec![value; extent.volume()]]).unwrap()
    }

    #[test]
    fn histogram_clamps_and_counts() {
        let mut histogram = Histogram::new(4, 0.0, 1.0);
        for value in [-1.0, 0.1, 0.3, 0.6, 0.99, 5.0] {
            histogram.add(value);
        }
        assert_eq!(histogram.counts, vec![2, 1, 1, 2]);
        assert_eq!(histogram.total(), 6);
    }

    #[test]
    fn grid_voxelizer_splits_inside_and_shell() {
        let stack = flat_stack(Extent::new(20, 20, 1), 0.5);
        let mark = Mark::ellipse(MarkId::from_raw(0), Point3::new(10.0, 10.0, 0.0), [3.0, 3.0], 0.0)
            .unwrap();
        let scheme = RegionScheme::default();
        let regions = GridVoxelizer.voxelize(&mark, &stack, &scheme).unwrap();
        assert!(regions.inside.contains(&[10, 10, 0]));
        assert!(regions.inside.contains(&[13, 10, 0]));
        assert!(regions.shell.contains(&[14, 10, 0]));
        assert!(!regions.shell.contains(&[10, 10, 0]));
        assert!(regions.inside.iter().all(|v| !regions.shell.contains(v)));
    }

    #[test]
    fn statistics_follow_the_stack() {
        let stack = flat_stack(Extent::new(10, 10, 1), 0.25);
        let mark = Mark::ellipse(MarkId::from_raw(0), Point3::new(5.0, 5.0, 0.0), [2.0, 2.0], 0.0)
            .unwrap();
        let context = VoxelContext::new(Arc::new(stack), RegionScheme::default());
        let voxelized = context.voxelize(&mark).unwrap();
        let inside = voxelized.stats(Region::Inside, 0).unwrap();
        assert_eq!(inside.count, voxelized.voxels(Region::Inside).len());
        assert!((inside.mean - 0.25).abs() < 1e-12);
        assert!(inside.variance.abs() < 1e-12);
        assert!(voxelized.stats(Region::Inside, 1).is_none());
    }

    #[test]
    fn overlap_requires_shared_interior() {
        let stack = Arc::new(flat_stack(Extent::new(30, 30, 1), 0.0));
        let context = VoxelContext::new(stack, RegionScheme::default());
        let a = Mark::ellipse(MarkId::from_raw(0), Point3::new(8.0, 8.0, 0.0), [3.0, 3.0], 0.0).unwrap();
        let b = Mark::ellipse(MarkId::from_raw(1), Point3::new(12.0, 8.0, 0.0), [3.0, 3.0], 0.0).unwrap();
        let c = Mark::ellipse(MarkId::from_raw(2), Point3::new(22.0, 22.0, 0.0), [3.0, 3.0], 0.0).unwrap();
        let (va, vb, vc) = (
            context.voxelize(&a).unwrap(),
            context.voxelize(&b).unwrap(),
            context.voxelize(&c).unwrap(),
        );
        assert!(va.overlaps(&vb));
        assert!(!va.overlaps(&vc));
        assert_eq!(
            va.shared_voxels(Region::Inside, &vb, Region::Inside),
            vb.shared_voxels(Region::Inside, &va, Region::Inside)
        );
    }
}
