use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::utilities::bounding_box::BoundingBox;

/// Collision shape representing an axis-aligned (in local space) box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxShape {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoxShape {
    /// Creates a box centered on the body origin with the given full dimensions.
    #[inline(always)]
    pub fn new(width: f32, height: f32, length: f32) -> Self {
        let half = Vec3::new(width, height, length) * 0.5;
        Self {
            min: -half,
            max: half,
        }
    }

    #[inline(always)]
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Full edge lengths.
    #[inline(always)]
    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline(always)]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(self.min, self.max)
    }

    /// Signed distance from `point` to the box surface with the outward normal.
    ///
    /// Inside the box the closest face wins; outside the distance is to the closest surface point.
    pub fn phi_with_normal(&self, point: Vec3) -> (f32, Vec3) {
        let max_dists = point - self.max;
        let min_dists = self.min - point;
        if max_dists.cmple(Vec3::ZERO).all() && min_dists.cmple(Vec3::ZERO).all() {
            let mut phi = f32::MIN;
            let mut normal = Vec3::Z;
            for axis in 0..3 {
                if max_dists[axis] > phi {
                    phi = max_dists[axis];
                    normal = Vec3::ZERO;
                    normal[axis] = 1.0;
                }
                if min_dists[axis] > phi {
                    phi = min_dists[axis];
                    normal = Vec3::ZERO;
                    normal[axis] = -1.0;
                }
            }
            (phi, normal)
        } else {
            let closest = point.clamp(self.min, self.max);
            let difference = point - closest;
            let phi = difference.length();
            (phi, difference / phi)
        }
    }

    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.phi_with_normal(point).0
    }

    /// Solid box inertia about the box center, shifted to the body origin.
    pub fn compute_inertia(&self, mass: f32) -> Mat3 {
        let e = self.extents();
        let (x2, y2, z2) = (e.x * e.x, e.y * e.y, e.z * e.z);
        let c = self.center();
        let shift = mass * c.length_squared();
        Mat3::from_diagonal(
            Vec3::new(y2 + z2, x2 + z2, x2 + y2) * (mass / 12.0) + Vec3::splat(shift),
        )
    }

    /// Eight corners followed by the six face centers.
    pub fn compute_sample_points(&self) -> Vec<Vec3> {
        let mut points = BoundingBox::new(self.min, self.max).corners().to_vec();
        let center = self.center();
        for axis in 0..3 {
            let mut low = center;
            low[axis] = self.min[axis];
            let mut high = center;
            high[axis] = self.max[axis];
            points.push(low);
            points.push(high);
        }
        points
    }
}
