use crate::physics::body_properties::RigidPose;
use crate::physics::collidables::box_shape::BoxShape;
use crate::physics::collidables::sphere::Sphere;
use crate::physics::collision_detection::contact::ContactConstraint;

/// Pair tester for sphere vs box contacts.
pub struct SphereBoxTester;

impl SphereBoxTester {
    #[inline]
    pub fn update(
        sphere: &Sphere,
        sphere_pose: &RigidPose,
        box_shape: &BoxShape,
        box_pose: &RigidPose,
        constraint: &mut ContactConstraint,
    ) -> bool {
        let center = sphere_pose.transform_point(sphere.center);
        let (phi, local_normal) = box_shape.phi_with_normal(box_pose.inverse_transform_point(center));
        let normal = box_pose.transform_vector(local_normal);
        constraint.keep_deepest(phi - sphere.radius, normal, center - normal * sphere.radius)
    }
}
