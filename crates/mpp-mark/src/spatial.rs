use mpp_core::MarkId;

use crate::configuration::Configuration;
use crate::geometry::BoundingBox;

/// Coarse neighbour lookup: returns marks whose bounding boxes may overlap
/// `bbox`. Results may contain false positives but never miss a true overlap.
pub trait SpatialIndex: Send + Sync {
    /// Candidate neighbours of `bbox` in ascending identifier order.
    fn candidates(&self, configuration: &Configuration, bbox: &BoundingBox, margin: f64) -> Vec<MarkId>;
}

/// Index that compares bounding boxes of every mark.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScanIndex;

impl SpatialIndex for LinearScanIndex {
    fn candidates(&self, configuration: &Configuration, bbox: &BoundingBox, margin: f64) -> Vec<MarkId> {
        configuration
            .marks()
            .filter(|mark| mark.bounding_box(margin).intersects(bbox))
            .map(|mark| mark.id())
            .collect()
    }
}
