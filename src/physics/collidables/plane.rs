use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Infinite half-space. Points on the `normal` side have positive phi.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub point: Vec3,
    pub normal: Vec3,
}

impl Plane {
    /// Creates a plane through `point`. The normal is normalized.
    pub fn new(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            point,
            normal: if normal == Vec3::ZERO { Vec3::Z } else { normal },
        }
    }

    /// The z = 0 ground plane facing +Z.
    pub fn ground() -> Self {
        Self::new(Vec3::ZERO, Vec3::Z)
    }

    #[inline]
    pub fn phi_with_normal(&self, point: Vec3) -> (f32, Vec3) {
        ((point - self.point).dot(self.normal), self.normal)
    }

    /// Projects `point` onto the plane surface.
    #[inline]
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        point - self.normal * self.phi_with_normal(point).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phi_is_height_above_plane() {
        let plane = Plane::new(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, 2.0));
        let (phi, normal) = plane.phi_with_normal(Vec3::new(4.0, -1.0, 3.5));
        assert!((phi - 2.5).abs() < 1e-6);
        assert_eq!(normal, Vec3::Z);
        assert!((plane.closest_point(Vec3::new(1.0, 1.0, 0.0)) - Vec3::new(1.0, 1.0, 1.0)).length() < 1e-6);
    }
}
