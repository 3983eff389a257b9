use serde::{Deserialize, Serialize};

/// Integer voxel coordinate `[x, y, z]` inside an [`Extent`].
pub type Voxel = [usize; 3];

/// Point in continuous voxel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Point3 {
    /// Creates a point from its coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Centre of the given voxel.
    pub fn of_voxel(voxel: Voxel) -> Self {
        Self::new(voxel[0] as f64, voxel[1] as f64, voxel[2] as f64)
    }

    /// Component-wise offset.
    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Returns `true` when every coordinate is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Size of the voxel grid in each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// Number of voxels along x.
    pub x: usize,
    /// Number of voxels along y.
    pub y: usize,
    /// Number of voxels along z (1 for planar images).
    pub z: usize,
}

impl Extent {
    /// Creates an extent.
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Total number of voxels.
    pub fn volume(&self) -> usize {
        self.x * self.y * self.z
    }

    /// Returns `true` for single-slice extents.
    pub fn is_planar(&self) -> bool {
        self.z <= 1
    }

    /// Linear offset of a voxel (x fastest), or `None` when outside.
    pub fn offset_of(&self, voxel: Voxel) -> Option<usize> {
        if voxel[0] >= self.x || voxel[1] >= self.y || voxel[2] >= self.z {
            return None;
        }
        Some((voxel[2] * self.y + voxel[1]) * self.x + voxel[0])
    }

    /// Returns `true` when the point lies within the continuous grid bounds.
    pub fn contains_point(&self, point: &Point3) -> bool {
        point.x >= 0.0
            && point.y >= 0.0
            && point.z >= 0.0
            && point.x <= (self.x.max(1) - 1) as f64
            && point.y <= (self.y.max(1) - 1) as f64
            && point.z <= (self.z.max(1) - 1) as f64
    }

    /// The whole grid as a bounding box.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            min: [0, 0, 0],
            max: [
                self.x as i64 - 1,
                self.y as i64 - 1,
                self.z as i64 - 1,
            ],
        }
    }
}

/// Inclusive, axis-aligned voxel bounding box. May extend outside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Inclusive lower corner.
    pub min: [i64; 3],
    /// Inclusive upper corner.
    pub max: [i64; 3],
}

impl BoundingBox {
    /// Returns `true` when the boxes share at least one voxel.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.max[axis] && other.min[axis] <= self.max[axis])
    }

    /// Restricts the box to the grid, `None` when nothing remains.
    pub fn clip(&self, extent: &Extent) -> Option<BoundingBox> {
        let grid = extent.bounding_box();
        let mut min = [0i64; 3];
        let mut max = [0i64; 3];
        for axis in 0..3 {
            min[axis] = self.min[axis].max(grid.min[axis]);
            max[axis] = self.max[axis].min(grid.max[axis]);
            if min[axis] > max[axis] {
                return None;
            }
        }
        Some(BoundingBox { min, max })
    }

    /// Grows the box by `margin` voxels on every side.
    pub fn grow(&self, margin: i64) -> BoundingBox {
        BoundingBox {
            min: self.min.map(|v| v - margin),
            max: self.max.map(|v| v + margin),
        }
    }

    /// Iterates voxels of a box already clipped to the grid, x fastest.
    pub fn voxels(&self) -> impl Iterator<Item = Voxel> + '_ {
        let [x0, y0, z0] = self.min.map(|v| v.max(0) as usize);
        let [x1, y1, z1] = self.max.map(|v| v.max(0) as usize);
        (z0..=z1).flat_map(move |z| (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| [x, y, z])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_discards_disjoint_boxes() {
        let extent = Extent::new(10, 10, 1);
        let outside = BoundingBox {
            min: [12, 0, 0],
            max: [15, 3, 0],
        };
        assert!(outside.clip(&extent).is_none());
        let partial = BoundingBox {
            min: [-3, 8, 0],
            max: [2, 12, 0],
        };
        let clipped = partial.clip(&extent).unwrap();
        assert_eq!(clipped.min, [0, 8, 0]);
        assert_eq!(clipped.max, [2, 9, 0]);
        assert_eq!(clipped.voxels().count(), 6);
    }

    #[test]
    fn offsets_are_row_major() {
        let extent = Extent::new(4, 3, 2);
        assert_eq!(extent.offset_of([0, 0, 0]), Some(0));
        assert_eq!(extent.offset_of([1, 0, 0]), Some(1));
        assert_eq!(extent.offset_of([0, 1, 0]), Some(4));
        assert_eq!(extent.offset_of([0, 0, 1]), Some(12));
        assert_eq!(extent.offset_of([4, 0, 0]), None);
    }
}
