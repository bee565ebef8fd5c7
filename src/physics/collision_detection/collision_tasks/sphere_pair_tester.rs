use glam::Vec3;

use crate::physics::body_properties::RigidPose;
use crate::physics::collidables::sphere::Sphere;
use crate::physics::collision_detection::contact::ContactConstraint;
use crate::utilities::math_helper::SMALL_NUMBER;

/// Pair tester for sphere vs sphere contacts.
pub struct SpherePairTester;

impl SpherePairTester {
    /// Sphere `a` belongs to the particle body, `b` to the levelset body.
    #[inline]
    pub fn update(a: &Sphere, pose_a: &RigidPose, b: &Sphere, pose_b: &RigidPose, constraint: &mut ContactConstraint) -> bool {
        let center_a = pose_a.transform_point(a.center);
        let center_b = pose_b.transform_point(b.center);
        let offset = center_a - center_b;
        let distance = offset.length();
        let phi = distance - (a.radius + b.radius);
        // Arbitrarily choose +Z if the two spheres are in the same position.
        let normal = if distance > SMALL_NUMBER { offset / distance } else { Vec3::Z };
        constraint.keep_deepest(phi, normal, center_a - normal * a.radius)
    }
}
