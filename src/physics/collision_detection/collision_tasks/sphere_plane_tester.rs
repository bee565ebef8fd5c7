use crate::physics::body_properties::RigidPose;
use crate::physics::collidables::plane::Plane;
use crate::physics::collidables::sphere::Sphere;
use crate::physics::collision_detection::contact::ContactConstraint;

/// Pair tester for sphere vs plane contacts.
pub struct SpherePlaneTester;

impl SpherePlaneTester {
    #[inline]
    pub fn update(
        sphere: &Sphere,
        sphere_pose: &RigidPose,
        plane: &Plane,
        plane_pose: &RigidPose,
        constraint: &mut ContactConstraint,
    ) -> bool {
        let center = sphere_pose.transform_point(sphere.center);
        let (phi, local_normal) = plane.phi_with_normal(plane_pose.inverse_transform_point(center));
        let normal = plane_pose.transform_vector(local_normal);
        constraint.keep_deepest(phi - sphere.radius, normal, center - normal * sphere.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn location_is_world_space_contact_point() {
        let mut contact = ContactConstraint::new(1, 0, 0.0);
        let sphere_pose = RigidPose::from_position(Vec3::new(3.0, 4.0, 0.9));
        SpherePlaneTester::update(&Sphere::new(1.0), &sphere_pose, &Plane::ground(), &RigidPose::IDENTITY, &mut contact);
        assert!((contact.phi + 0.1).abs() < 1e-5);
        assert!((contact.location - Vec3::new(3.0, 4.0, -0.1)).length() < 1e-5);
    }

    #[test]
    fn rotated_plane_normal_is_world_space() {
        let mut contact = ContactConstraint::new(1, 0, 0.0);
        // Ground plane tipped so it faces +X.
        let plane_pose = RigidPose::new(Vec3::ZERO, Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        SpherePlaneTester::update(
            &Sphere::new(1.0),
            &RigidPose::from_position(Vec3::new(0.5, 0.0, 0.0)),
            &Plane::ground(),
            &plane_pose,
            &mut contact,
        );
        assert!((contact.normal - Vec3::X).length() < 1e-5);
        assert!((contact.phi + 0.5).abs() < 1e-5);
    }
}
