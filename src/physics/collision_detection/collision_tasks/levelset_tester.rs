use glam::Vec3;

use crate::physics::body_properties::RigidPose;
use crate::physics::collidables::collision_particles::CollisionParticles;
use crate::physics::collidables::shape::Shape;
use crate::physics::collision_detection::contact::ContactConstraint;
use crate::utilities::math_helper::KINDA_SMALL_NUMBER;

/// Sampled fallback: tests one body's collision particles against another body's implicit surface.
pub struct LevelsetTester;

impl LevelsetTester {
    /// Samples `samples` (placed at `samples_pose`) against `object` (placed at `object_pose`).
    ///
    /// With `normal_averaging`, every sample deeper than `thickness` contributes to a penetration-weighted
    /// average point, and the surface is re-evaluated there. Otherwise only the deepest sample counts.
    pub fn sample_object(
        object: &Shape,
        object_pose: &RigidPose,
        samples: &CollisionParticles,
        samples_pose: &RigidPose,
        thickness: f32,
        normal_averaging: bool,
        constraint: &mut ContactConstraint,
    ) -> bool {
        let sample_to_object = samples_pose.relative_to(object_pose);
        let candidates: Vec<usize> = match object.bounding_box() {
            Some(bounds) => {
                let mut region = bounds.transformed(&object_pose.relative_to(samples_pose));
                region.thicken(thickness);
                samples.find_all_intersections(&region)
            }
            None => (0..samples.len()).collect(),
        };

        let points = samples.points();
        let local_point = if normal_averaging {
            let mut weighted = Vec3::ZERO;
            let mut total_depth = 0.0;
            for &index in &candidates {
                let local = sample_to_object.transform_point(points[index]);
                let depth = object.phi_with_normal(local).0 - thickness;
                if depth < -KINDA_SMALL_NUMBER {
                    weighted += local * depth;
                    total_depth += depth;
                }
            }
            if total_depth >= -KINDA_SMALL_NUMBER {
                return false;
            }
            weighted / total_depth
        } else {
            let mut deepest: Option<(f32, Vec3)> = None;
            for &index in &candidates {
                let local = sample_to_object.transform_point(points[index]);
                let phi = object.phi_with_normal(local).0;
                if phi < deepest.map_or(thickness, |(best, _)| best) {
                    deepest = Some((phi, local));
                }
            }
            match deepest {
                Some((_, local)) => local,
                None => return false,
            }
        };

        let (phi, local_normal) = object.phi_with_normal(local_point);
        constraint.keep_deepest(
            phi,
            object_pose.transform_vector(local_normal),
            object_pose.transform_point(local_point),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::box_shape::BoxShape;
    use crate::physics::collidables::level_set::LevelSet;
    use crate::physics::collidables::plane::Plane;
    use crate::utilities::bounding_box::BoundingBox;

    fn cube_samples() -> CollisionParticles {
        CollisionParticles::new(BoxShape::new(2.0, 2.0, 2.0).compute_sample_points())
    }

    #[test]
    fn deepest_sample_against_plane() {
        let mut contact = ContactConstraint::new(1, 0, 0.0);
        let applied = LevelsetTester::sample_object(
            &Shape::Plane(Plane::ground()),
            &RigidPose::IDENTITY,
            &cube_samples(),
            &RigidPose::from_position(Vec3::new(0.0, 0.0, 0.8)),
            0.0,
            false,
            &mut contact,
        );
        assert!(applied);
        assert!((contact.phi + 0.2).abs() < 1e-5);
        assert_eq!(contact.normal, Vec3::Z);
    }

    #[test]
    fn averaged_contact_sits_under_the_center() {
        let mut contact = ContactConstraint::new(1, 0, 0.0);
        LevelsetTester::sample_object(
            &Shape::Plane(Plane::ground()),
            &RigidPose::IDENTITY,
            &cube_samples(),
            &RigidPose::from_position(Vec3::new(3.0, 0.0, 0.8)),
            0.0,
            true,
            &mut contact,
        );
        assert!((contact.phi + 0.2).abs() < 1e-5);
        assert!((contact.location.x - 3.0).abs() < 1e-4);
        assert!(contact.location.y.abs() < 1e-4);
    }

    #[test]
    fn samples_against_grid_level_set() {
        let level_set = LevelSet::from_fn(
            BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
            0.5,
            24,
            |p| BoxShape::new(2.0, 2.0, 2.0).signed_distance(p),
        );
        let mut contact = ContactConstraint::new(1, 0, 0.0);
        let applied = LevelsetTester::sample_object(
            &Shape::LevelSet(level_set),
            &RigidPose::IDENTITY,
            &cube_samples(),
            &RigidPose::from_position(Vec3::new(0.0, 0.0, 1.8)),
            0.0,
            false,
            &mut contact,
        );
        assert!(applied);
        assert!(contact.phi < -0.1 && contact.phi > -0.3);
        assert!(contact.normal.z > 0.9);
    }

    #[test]
    fn separated_samples_do_nothing() {
        let mut contact = ContactConstraint::new(1, 0, 0.0);
        let applied = LevelsetTester::sample_object(
            &Shape::Plane(Plane::ground()),
            &RigidPose::IDENTITY,
            &cube_samples(),
            &RigidPose::from_position(Vec3::new(0.0, 0.0, 5.0)),
            0.0,
            true,
            &mut contact,
        );
        assert!(!applied);
        assert_eq!(contact.phi, 0.0);
    }
}
