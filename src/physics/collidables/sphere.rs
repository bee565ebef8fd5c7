use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::math_helper::SMALL_NUMBER;

/// Collision shape representing a sphere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    /// Center of the sphere in the body's local space.
    pub center: Vec3,
    /// Radius of the sphere.
    pub radius: f32,
}

impl Sphere {
    /// Creates a sphere shape centered on the body origin.
    #[inline(always)]
    pub fn new(radius: f32) -> Self {
        Self {
            center: Vec3::ZERO,
            radius,
        }
    }

    #[inline(always)]
    pub fn with_center(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Signed distance to the surface and the outward normal at the closest surface point.
    /// Points at the exact center report +Z.
    pub fn phi_with_normal(&self, point: Vec3) -> (f32, Vec3) {
        let offset = point - self.center;
        let distance = offset.length();
        let normal = if distance > SMALL_NUMBER {
            offset / distance
        } else {
            Vec3::Z
        };
        (distance - self.radius, normal)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_center(self.center, Vec3::splat(self.radius))
    }

    /// Solid sphere inertia about the body origin.
    pub fn compute_inertia(&self, mass: f32) -> Mat3 {
        let moment = 0.4 * mass * self.radius * self.radius;
        let shift = mass * self.center.length_squared();
        Mat3::from_diagonal(Vec3::splat(moment + shift))
    }

    /// Surface samples along the axes and the eight diagonals.
    pub fn compute_sample_points(&self) -> Vec<Vec3> {
        let mut points = Vec::with_capacity(14);
        for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
            points.push(self.center + axis * self.radius);
            points.push(self.center - axis * self.radius);
        }
        let diagonal = self.radius / 3f32.sqrt();
        for x in [-1.0, 1.0] {
            for y in [-1.0, 1.0] {
                for z in [-1.0, 1.0] {
                    points.push(self.center + Vec3::new(x, y, z) * diagonal);
                }
            }
        }
        points
    }
}
