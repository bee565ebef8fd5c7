use glam::Vec3;

use crate::physics::body_properties::RigidPose;
use crate::physics::collidables::box_shape::BoxShape;
use crate::physics::collidables::sphere::Sphere;
use crate::physics::collision_detection::contact::ContactConstraint;

use super::sphere_pair_tester::SpherePairTester;

/// Pair tester for box vs box contacts.
///
/// Samples the corners and face centers of box `a` against box `b`. When the center of `a` is already inside
/// `b` the sampled surface distance pulls `a` further in, so both boxes are approximated by inscribed spheres.
pub struct BoxPairTester;

impl BoxPairTester {
    pub fn update(a: &BoxShape, pose_a: &RigidPose, b: &BoxShape, pose_b: &RigidPose, thickness: f32, constraint: &mut ContactConstraint) -> bool {
        let a_to_b = pose_a.relative_to(pose_b);
        let mut a_in_b = a.bounding_box().transformed(&a_to_b);
        let mut b_in_a = b.bounding_box().transformed(&pose_b.relative_to(pose_a));
        a_in_b.thicken(thickness);
        b_in_a.thicken(thickness);
        if !(b_in_a.intersects(&a.bounding_box()) && a_in_b.intersects(&b.bounding_box())) {
            return false;
        }

        let mut applied = false;
        let mut deep_overlap = false;
        if b.signed_distance(a_to_b.transform_point(a.center())) < 0.0 {
            let sphere_a = Sphere::with_center(a.center(), a.extents().min_element() * 0.5);
            let sphere_b = Sphere::with_center(b.center(), b.extents().min_element() * 0.5);
            let separation = pose_a.transform_point(sphere_a.center) - pose_b.transform_point(sphere_b.center);
            if separation.length() < sphere_a.radius + sphere_b.radius {
                deep_overlap = SpherePairTester::update(&sphere_a, pose_a, &sphere_b, pose_b, constraint);
                applied = deep_overlap;
            }
        }
        if !deep_overlap || constraint.phi >= 0.0 {
            let mut deepest: Option<(f32, Vec3, Vec3)> = None;
            for sample in a.compute_sample_points() {
                let local = a_to_b.transform_point(sample);
                let (phi, normal) = b.phi_with_normal(local);
                if phi < deepest.map_or(constraint.phi, |(best, _, _)| best) {
                    deepest = Some((phi, normal, local));
                }
            }
            if let Some((phi, normal, local)) = deepest {
                applied |= constraint.keep_deepest(phi, pose_b.transform_vector(normal), pose_b.transform_point(local));
            }
        }
        applied
    }
}
