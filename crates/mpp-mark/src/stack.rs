use mpp_core::errors::ErrorInfo;
use mpp_core::{MppError, RngHandle};
use serde::{Deserialize, Serialize};

use crate::geometry::{Extent, Point3, Voxel};
use crate::mark::Mark;

/// Immutable, image-derived energy field: one or more intensity channels
/// over a common voxel grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyStack {
    extent: Extent,
    channels: Vec<Vec<f64>>,
}

impl EnergyStack {
    /// Builds a stack, checking that every channel covers the whole extent.
    pub fn new(extent: Extent, channels: Vec<Vec<f64>>) -> Result<Self, MppError> {
        if extent.volume() == 0 {
            return Err(MppError::Geometry(ErrorInfo::new(
                "empty-extent",
                "energy stack must contain at least one voxel",
            )));
        }
        if channels.is_empty() {
            return Err(MppError::Geometry(ErrorInfo::new(
                "no-channels",
                "energy stack must contain at least one channel",
            )));
        }
        for (index, channel) in channels.iter().enumerate() {
            if channel.len() != extent.volume() {
                return Err(MppError::Geometry(
                    ErrorInfo::new("channel-size", "channel length does not match extent")
                        .with_context("channel", index.to_string())
                        .with_context("expected", extent.volume().to_string())
                        .with_context("actual", channel.len().to_string()),
                ));
            }
        }
        Ok(Self { extent, channels })
    }

    /// Grid extent.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Number of channels.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Intensity of `channel` at `voxel`, `None` when either is out of range.
    pub fn value(&self, channel: usize, voxel: Voxel) -> Option<f64> {
        let offset = self.extent.offset_of(voxel)?;
        self.channels.get(channel).map(|data| data[offset])
    }

    /// Paints `marks` with `foreground` over `background`, adding uniform noise
    /// of amplitude `noise`. Produces a single-channel stack.
    pub fn synthetic(
        extent: Extent,
        marks: &[Mark],
        background: f64,
        foreground: f64,
        noise: f64,
        rng: &mut RngHandle,
    ) -> Result<Self, MppError> {
        let mut data = vec![background; extent.volume()];
        for mark in marks {
            if let Some(bbox) = mark.bounding_box(0.0).clip(&extent) {
                for voxel in bbox.voxels() {
                    if mark.contains(&Point3::of_voxel(voxel)) {
                        if let Some(offset) = extent.offset_of(voxel) {
                            data[offset] = foreground;
                        }
                    }
                }
            }
        }
        if noise > 0.0 {
            for value in data.iter_mut() {
                *value += rng.next_range(-noise, noise);
            }
        }
        Self::new(extent, vec![data])
    }

    /// Parses a stack from JSON and validates it.
    pub fn from_json(json: &str) -> Result<Self, MppError> {
        let raw: EnergyStack = serde_json::from_str(json)
            .map_err(|err| MppError::Serde(ErrorInfo::new("stack-parse", err.to_string())))?;
        Self::new(raw.extent, raw.channels)
    }

    /// Serializes the stack to JSON.
    pub fn to_json(&self) -> Result<String, MppError> {
        serde_json::to_string(self)
            .map_err(|err| MppError::Serde(ErrorInfo::new("stack-serialize", err.to_string())))
    }
}
