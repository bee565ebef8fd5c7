use glam::Vec3;

use crate::physics::body_properties::RigidPose;
use crate::physics::collidables::box_shape::BoxShape;
use crate::physics::collidables::plane::Plane;
use crate::physics::collision_detection::contact::ContactConstraint;
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::math_helper::KINDA_SMALL_NUMBER;

/// Pair tester for box vs plane contacts.
///
/// Tests the eight corners. Corners within `KINDA_SMALL_NUMBER` of the deepest one are treated as tied and
/// the contact location is their average, so a box lying flat gets a centered contact.
pub struct BoxPlaneTester;

impl BoxPlaneTester {
    pub fn update(
        box_shape: &BoxShape,
        box_pose: &RigidPose,
        plane: &Plane,
        plane_pose: &RigidPose,
        constraint: &mut ContactConstraint,
    ) -> bool {
        let box_to_plane = box_pose.relative_to(plane_pose);
        let corners = BoundingBox::new(box_shape.min, box_shape.max).corners();
        let mut tied = [Vec3::ZERO; 8];
        let mut tied_count = 0;
        let mut applied = false;
        for corner in corners {
            let local = box_to_plane.transform_point(corner);
            let (phi, local_normal) = plane.phi_with_normal(local);
            if phi < constraint.phi + KINDA_SMALL_NUMBER {
                if phi <= constraint.phi - KINDA_SMALL_NUMBER {
                    tied_count = 0;
                }
                constraint.phi = constraint.phi.min(phi);
                constraint.normal = plane_pose.transform_vector(local_normal);
                constraint.location = plane_pose.transform_point(local);
                tied[tied_count] = constraint.location;
                tied_count += 1;
                applied = true;
            }
        }
        if tied_count > 1 {
            constraint.location = tied[..tied_count].iter().sum::<Vec3>() / tied_count as f32;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn flat_box_contact_is_centered() {
        let mut contact = ContactConstraint::new(1, 0, 0.0);
        let applied = BoxPlaneTester::update(
            &BoxShape::new(2.0, 2.0, 2.0),
            &RigidPose::from_position(Vec3::new(5.0, 0.0, 0.9)),
            &Plane::ground(),
            &RigidPose::IDENTITY,
            &mut contact,
        );
        assert!(applied);
        assert!((contact.phi + 0.1).abs() < 1e-5);
        assert!((contact.location - Vec3::new(5.0, 0.0, -0.1)).length() < 1e-4);
        assert_eq!(contact.normal, Vec3::Z);
    }

    #[test]
    fn tilted_box_uses_lowest_corner() {
        let mut contact = ContactConstraint::new(1, 0, 0.0);
        let pose = RigidPose::new(
            Vec3::new(0.0, 0.0, 1.0),
            Quat::from_rotation_x(0.3) * Quat::from_rotation_y(0.2),
        );
        let shape = BoxShape::new(2.0, 2.0, 2.0);
        BoxPlaneTester::update(&shape, &pose, &Plane::ground(), &RigidPose::IDENTITY, &mut contact);
        let lowest = BoundingBox::new(shape.min, shape.max)
            .corners()
            .iter()
            .map(|c| pose.transform_point(*c).z)
            .fold(f32::MAX, f32::min);
        assert!((contact.phi - lowest).abs() < 1e-5);
        assert!((contact.location.z - lowest).abs() < 1e-5);
    }
}
