#![deny(missing_docs)]

//! Marks, configurations and the voxelized-mark cache.
//!
//! A [`Configuration`] owns its marks outright, each wrapped in a
//! [`VoxelizedMarkMemo`] that lazily caches the voxel regions of the mark.
//! Forking a configuration duplicates every mark with an empty cache, so two
//! configurations never share mark state.

/// Ordered mark storage with unique identifiers.
pub mod configuration;
/// Points, extents and voxel bounding boxes.
pub mod geometry;
/// Parametric mark shapes.
pub mod mark;
/// Memoized voxelization of a single mark.
pub mod memo;
/// Coarse neighbour lookup by bounding box.
pub mod spatial;
/// Image-derived energy field.
pub mod stack;
/// Region classification, voxel sets and per-region statistics.
pub mod voxel;

pub use configuration::Configuration;
pub use geometry::{BoundingBox, Extent, Point3, Voxel};
pub use mark::{Mark, MarkShape, Orientation};
pub use memo::VoxelizedMarkMemo;
pub use spatial::{LinearScanIndex, SpatialIndex};
pub use stack::EnergyStack;
pub use voxel::{
    GridVoxelizer, Histogram, Region, RegionScheme, RegionStats, VoxelContext, VoxelRegions,
    VoxelizedMark, Voxelizer,
};
