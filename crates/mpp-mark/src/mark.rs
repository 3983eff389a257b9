use mpp_core::errors::ErrorInfo;
use mpp_core::{MarkId, MppError};
use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Point3};

/// Euler angles (radians) applied as yaw about z, then pitch about y, then roll about x.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    /// Rotation about the z axis.
    pub yaw: f64,
    /// Rotation about the y axis.
    pub pitch: f64,
    /// Rotation about the x axis.
    pub roll: f64,
}

impl Orientation {
    fn is_finite(&self) -> bool {
        self.yaw.is_finite() && self.pitch.is_finite() && self.roll.is_finite()
    }

    // Applies R^T = (Rz Ry Rx)^T to a vector, mapping world offsets into the local frame.
    fn to_local(&self, v: [f64; 3]) -> [f64; 3] {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        let (sr, cr) = self.roll.sin_cos();
        // Rz^T
        let a = [cy * v[0] + sy * v[1], -sy * v[0] + cy * v[1], v[2]];
        // Ry^T
        let b = [cp * a[0] - sp * a[2], a[1], sp * a[0] + cp * a[2]];
        // Rx^T
        [b[0], cr * b[1] + sr * b[2], -sr * b[1] + cr * b[2]]
    }
}

/// Closed vocabulary of supported mark shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MarkShape {
    /// Planar ellipse living in the z-slice nearest to its centre.
    Ellipse {
        /// Centre of the ellipse.
        centre: Point3,
        /// Semi-axes along the rotated x and y directions.
        radii: [f64; 2],
        /// In-plane rotation in radians.
        angle: f64,
    },
    /// Oriented ellipsoid.
    Ellipsoid {
        /// Centre of the ellipsoid.
        centre: Point3,
        /// Semi-axes along the local x, y and z directions.
        radii: [f64; 3],
        /// Orientation of the local frame.
        orientation: Orientation,
    },
}

/// A parametric geometric primitive with a stable identifier.
///
/// Deserialized marks pass through [`Mark::new`], so loaded files obey the
/// same validation as constructed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMark")]
pub struct Mark {
    id: MarkId,
    shape: MarkShape,
}

#[derive(Deserialize)]
struct RawMark {
    id: MarkId,
    shape: MarkShape,
}

impl TryFrom<RawMark> for Mark {
    type Error = MppError;

    fn try_from(raw: RawMark) -> Result<Self, Self::Error> {
        Mark::new(raw.id, raw.shape)
    }
}

impl Mark {
    /// Creates a mark after validating its parameters.
    pub fn new(id: MarkId, shape: MarkShape) -> Result<Self, MppError> {
        validate_shape(&shape).map_err(|err| err.with_context("mark", id.to_string()))?;
        Ok(Self { id, shape })
    }

    /// Creates a planar ellipse mark.
    pub fn ellipse(id: MarkId, centre: Point3, radii: [f64; 2], angle: f64) -> Result<Self, MppError> {
        Self::new(
            id,
            MarkShape::Ellipse {
                centre,
                radii,
                angle,
            },
        )
    }

    /// Creates an ellipsoid mark.
    pub fn ellipsoid(
        id: MarkId,
        centre: Point3,
        radii: [f64; 3],
        orientation: Orientation,
    ) -> Result<Self, MppError> {
        Self::new(
            id,
            MarkShape::Ellipsoid {
                centre,
                radii,
                orientation,
            },
        )
    }

    /// Identifier of the mark.
    pub fn id(&self) -> MarkId {
        self.id
    }

    /// Geometry of the mark.
    pub fn shape(&self) -> &MarkShape {
        &self.shape
    }

    /// Returns a copy of the mark carrying a different identifier.
    pub fn with_id(&self, id: MarkId) -> Self {
        Self {
            id,
            shape: self.shape.clone(),
        }
    }

    /// Centre of the mark.
    pub fn centre(&self) -> Point3 {
        match &self.shape {
            MarkShape::Ellipse { centre, .. } | MarkShape::Ellipsoid { centre, .. } => *centre,
        }
    }

    /// Area (ellipse) or volume (ellipsoid) in voxel units.
    pub fn volume(&self) -> f64 {
        match &self.shape {
            MarkShape::Ellipse { radii, .. } => std::f64::consts::PI * radii[0] * radii[1],
            MarkShape::Ellipsoid { radii, .. } => {
                4.0 / 3.0 * std::f64::consts::PI * radii[0] * radii[1] * radii[2]
            }
        }
    }

    /// Value of the normalized quadratic form at `point` for the shape
    /// dilated by `margin`; `<= 1` means inside.
    pub fn scaled_distance(&self, point: &Point3, margin: f64) -> f64 {
        match &self.shape {
            MarkShape::Ellipse {
                centre,
                radii,
                angle,
            } => {
                if (point.z - centre.z).abs() >= 0.5 {
                    return f64::INFINITY;
                }
                let (s, c) = angle.sin_cos();
                let dx = point.x - centre.x;
                let dy = point.y - centre.y;
                let u = (c * dx + s * dy) / (radii[0] + margin);
                let v = (-s * dx + c * dy) / (radii[1] + margin);
                u * u + v * v
            }
            MarkShape::Ellipsoid {
                centre,
                radii,
                orientation,
            } => {
                let local = orientation.to_local([
                    point.x - centre.x,
                    point.y - centre.y,
                    point.z - centre.z,
                ]);
                local
                    .iter()
                    .zip(radii.iter())
                    .map(|(d, r)| {
                        let q = d / (r + margin);
                        q * q
                    })
                    .sum()
            }
        }
    }

    /// Returns `true` when `point` lies inside the undilated shape.
    pub fn contains(&self, point: &Point3) -> bool {
        self.scaled_distance(point, 0.0) <= 1.0
    }

    /// Conservative voxel bounding box of the shape dilated by `margin`.
    pub fn bounding_box(&self, margin: f64) -> BoundingBox {
        let (centre, half) = match &self.shape {
            MarkShape::Ellipse {
                centre,
                radii,
                angle,
            } => {
                let (s, c) = angle.sin_cos();
                let a = radii[0] + margin;
                let b = radii[1] + margin;
                let hx = ((a * c).powi(2) + (b * s).powi(2)).sqrt();
                let hy = ((a * s).powi(2) + (b * c).powi(2)).sqrt();
                (*centre, [hx, hy, 0.0])
            }
            MarkShape::Ellipsoid { centre, radii, .. } => {
                let r = radii.iter().copied().fold(0.0_f64, f64::max) + margin;
                (*centre, [r, r, r])
            }
        };
        let coords = [centre.x, centre.y, centre.z];
        let mut min = [0i64; 3];
        let mut max = [0i64; 3];
        for axis in 0..3 {
            if half[axis] == 0.0 {
                min[axis] = coords[axis].round() as i64;
                max[axis] = min[axis];
            } else {
                min[axis] = (coords[axis] - half[axis]).floor() as i64;
                max[axis] = (coords[axis] + half[axis]).ceil() as i64;
            }
        }
        BoundingBox { min, max }
    }

    /// Copy of the mark shifted by the given offsets (z ignored for ellipses).
    pub fn translated(&self, dx: f64, dy: f64, dz: f64) -> Result<Self, MppError> {
        let shape = match &self.shape {
            MarkShape::Ellipse {
                centre,
                radii,
                angle,
            } => MarkShape::Ellipse {
                centre: centre.offset(dx, dy, 0.0),
                radii: *radii,
                angle: *angle,
            },
            MarkShape::Ellipsoid {
                centre,
                radii,
                orientation,
            } => MarkShape::Ellipsoid {
                centre: centre.offset(dx, dy, dz),
                radii: *radii,
                orientation: *orientation,
            },
        };
        Self::new(self.id, shape)
    }

    /// Copy of the mark with every radius multiplied by the matching factor.
    pub fn scaled(&self, factors: [f64; 3]) -> Result<Self, MppError> {
        let shape = match &self.shape {
            MarkShape::Ellipse {
                centre,
                radii,
                angle,
            } => MarkShape::Ellipse {
                centre: *centre,
                radii: [radii[0] * factors[0], radii[1] * factors[1]],
                angle: *angle,
            },
            MarkShape::Ellipsoid {
                centre,
                radii,
                orientation,
            } => MarkShape::Ellipsoid {
                centre: *centre,
                radii: [
                    radii[0] * factors[0],
                    radii[1] * factors[1],
                    radii[2] * factors[2],
                ],
                orientation: *orientation,
            },
        };
        Self::new(self.id, shape)
    }

    /// Copy of the mark rotated by `delta` radians (in-plane angle or yaw).
    pub fn rotated(&self, delta: f64) -> Result<Self, MppError> {
        let shape = match &self.shape {
            MarkShape::Ellipse {
                centre,
                radii,
                angle,
            } => MarkShape::Ellipse {
                centre: *centre,
                radii: *radii,
                angle: angle + delta,
            },
            MarkShape::Ellipsoid {
                centre,
                radii,
                orientation,
            } => MarkShape::Ellipsoid {
                centre: *centre,
                radii: *radii,
                orientation: Orientation {
                    yaw: orientation.yaw + delta,
                    ..*orientation
                },
            },
        };
        Self::new(self.id, shape)
    }
}

fn validate_shape(shape: &MarkShape) -> Result<(), MppError> {
    let (centre, radii, angles_finite): (&Point3, &[f64], bool) = match shape {
        MarkShape::Ellipse {
            centre,
            radii,
            angle,
        } => (centre, radii, angle.is_finite()),
        MarkShape::Ellipsoid {
            centre,
            radii,
            orientation,
        } => (centre, radii, orientation.is_finite()),
    };
    if !centre.is_finite() || !angles_finite {
        return Err(MppError::Geometry(ErrorInfo::new(
            "non-finite-parameter",
            "mark centre and orientation must be finite",
        )));
    }
    if let Some(bad) = radii.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
        return Err(MppError::Geometry(
            ErrorInfo::new("invalid-radius", "radii must be positive and finite")
                .with_context("radius", bad.to_string()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> MarkId {
        MarkId::from_raw(raw)
    }

    #[test]
    fn rejects_degenerate_radii() {
        let err = Mark::ellipse(id(1), Point3::new(1.0, 1.0, 0.0), [0.0, 2.0], 0.0).unwrap_err();
        assert_eq!(err.info().code, "invalid-radius");
        assert_eq!(err.info().context.get("mark").map(String::as_str), Some("m1"));
    }

    #[test]
    fn deserialization_applies_the_same_validation() {
        let bad = serde_json::json!({
            "id": 4,
            "shape": {
                "type": "ellipse",
                "centre": { "x": 5.0, "y": 5.0, "z": 0.0 },
                "radii": [-3.0, 0.0],
                "angle": 0.0
            }
        });
        let err = serde_json::from_value::<Mark>(bad).unwrap_err();
        assert!(err.to_string().contains("radii must be positive"));

        let good = Mark::ellipse(id(4), Point3::new(5.0, 5.0, 0.0), [3.0, 2.0], 0.25).unwrap();
        let back: Mark = serde_json::from_str(&serde_json::to_string(&good).unwrap()).unwrap();
        assert_eq!(back, good);
    }

    #[test]
    fn rotated_ellipse_contains_along_major_axis() {
        let mark = Mark::ellipse(
            id(1),
            Point3::new(10.0, 10.0, 0.0),
            [5.0, 1.0],
            std::f64::consts::FRAC_PI_2,
        )
        .unwrap();
        assert!(mark.contains(&Point3::new(10.0, 14.0, 0.0)));
        assert!(!mark.contains(&Point3::new(14.0, 10.0, 0.0)));
        assert!(!mark.contains(&Point3::new(10.0, 10.0, 1.0)));
    }

    #[test]
    fn ellipsoid_yaw_rotates_major_axis() {
        let orientation = Orientation {
            yaw: std::f64::consts::FRAC_PI_2,
            ..Orientation::default()
        };
        let mark = Mark::ellipsoid(id(2), Point3::new(8.0, 8.0, 8.0), [4.0, 1.0, 1.0], orientation)
            .unwrap();
        assert!(mark.contains(&Point3::new(8.0, 11.5, 8.0)));
        assert!(!mark.contains(&Point3::new(11.5, 8.0, 8.0)));
        let bbox = mark.bounding_box(0.0);
        assert_eq!(bbox.min, [4, 4, 4]);
        assert_eq!(bbox.max, [12, 12, 12]);
    }

    #[test]
    fn transforms_keep_identifier() {
        let mark = Mark::ellipse(id(9), Point3::new(3.0, 3.0, 0.0), [2.0, 1.0], 0.0).unwrap();
        let moved = mark.translated(1.0, -1.0, 5.0).unwrap();
        assert_eq!(moved.id(), mark.id());
        assert_eq!(moved.centre(), Point3::new(4.0, 2.0, 0.0));
        let grown = mark.scaled([2.0, 2.0, 2.0]).unwrap();
        assert!((grown.volume() - 4.0 * mark.volume()).abs() < 1e-9);
        assert!(mark.scaled([-1.0, 1.0, 1.0]).is_err());
    }
}
