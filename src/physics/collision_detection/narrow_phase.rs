use crate::physics::body_properties::RigidPose;
use crate::physics::collidables::collision_particles::CollisionParticles;
use crate::physics::collidables::shape::{Shape, ShapeKind};
use crate::physics::collision_detection::broad_phase::CandidatePair;
use crate::physics::collision_detection::collision_tasks::box_pair_tester::BoxPairTester;
use crate::physics::collision_detection::collision_tasks::box_plane_tester::BoxPlaneTester;
use crate::physics::collision_detection::collision_tasks::levelset_tester::LevelsetTester;
use crate::physics::collision_detection::collision_tasks::sphere_box_tester::SphereBoxTester;
use crate::physics::collision_detection::collision_tasks::sphere_pair_tester::SpherePairTester;
use crate::physics::collision_detection::collision_tasks::sphere_plane_tester::SpherePlaneTester;
use crate::physics::collision_detection::collision_tasks::union_tester::UnionTester;
use crate::physics::collision_detection::contact::ContactConstraint;
use crate::physics::particles::ParticleSet;
use crate::utilities::thread_dispatcher::ThreadDispatcher;

/// Sample points of the particle body, posed in world space.
#[derive(Clone, Copy)]
struct PosedSamples<'a> {
    samples: &'a CollisionParticles,
    pose: RigidPose,
}

/// Turns candidate pairs into contact constraints.
///
/// Shape pairs are normalized so that the body playing the "particle" role is the one whose geometry
/// is cheapest to probe: spheres probe boxes and planes, boxes probe planes, non-unions probe unions.
/// A plane is never the particle, even against a union.
/// Everything else falls back to sampling the particle body's collision particles against the other shape.
pub struct NarrowPhase;

impl NarrowPhase {
    /// Builds an unresolved constraint for two bodies with their roles assigned.
    pub fn compute_constraint(particles: &ParticleSet, body1: usize, body2: usize, thickness: f32) -> ContactConstraint {
        let (Some(shape1), Some(shape2)) = (particles.geometry(body1), particles.geometry(body2)) else {
            return ContactConstraint::new(body1, body2, thickness);
        };
        let swap = match (shape1.kind(), shape2.kind()) {
            (ShapeKind::Box | ShapeKind::Sphere, ShapeKind::Box | ShapeKind::Sphere | ShapeKind::Plane) => {
                shape1.kind() == ShapeKind::Box && shape2.kind() == ShapeKind::Sphere
            }
            (ShapeKind::Plane, _) => true,
            (_, ShapeKind::Plane) => false,
            (_, ShapeKind::Union) => false,
            (ShapeKind::Union, _) => true,
            _ => particles.collision_particles(body1).is_none(),
        };
        if swap {
            ContactConstraint::new(body2, body1, thickness)
        } else {
            ContactConstraint::new(body1, body2, thickness)
        }
    }

    /// Recomputes the constraint geometry from the predicted poses.
    pub fn update_constraint(
        particles: &ParticleSet,
        thickness: f32,
        normal_averaging: bool,
        constraint: &mut ContactConstraint,
    ) {
        let particle_pose = particles.predicted_transform(constraint.particle_index);
        let levelset_pose = particles.predicted_transform(constraint.levelset_index);
        Self::update_constraint_at(
            particles,
            &particle_pose,
            &levelset_pose,
            thickness,
            normal_averaging,
            constraint,
        );
    }

    /// Recomputes the constraint geometry with the two bodies placed at the given poses.
    ///
    /// A non-finite result leaves `phi` at `thickness`, which drops the contact.
    pub fn update_constraint_at(
        particles: &ParticleSet,
        particle_pose: &RigidPose,
        levelset_pose: &RigidPose,
        thickness: f32,
        normal_averaging: bool,
        constraint: &mut ContactConstraint,
    ) {
        constraint.reset(thickness);
        let (Some(particle_shape), Some(levelset_shape)) = (
            particles.geometry(constraint.particle_index),
            particles.geometry(constraint.levelset_index),
        ) else {
            return;
        };
        let samples = particles
            .collision_particles(constraint.particle_index)
            .map(|samples| PosedSamples {
                samples: samples.as_ref(),
                pose: *particle_pose,
            });

        Self::update_shape_pair(
            particle_shape,
            particle_pose,
            levelset_shape,
            levelset_pose,
            samples,
            thickness,
            normal_averaging,
            constraint,
        );

        if !constraint.phi.is_finite() || !constraint.normal.is_finite() || !constraint.location.is_finite() {
            tracing::warn!(
                particle = constraint.particle_index,
                levelset = constraint.levelset_index,
                phi = constraint.phi,
                "non-finite contact, dropping it"
            );
            constraint.phi = thickness;
            constraint.normal = glam::Vec3::Z;
            constraint.location = glam::Vec3::ZERO;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn update_shape_pair(
        particle: &Shape,
        particle_pose: &RigidPose,
        levelset: &Shape,
        levelset_pose: &RigidPose,
        samples: Option<PosedSamples<'_>>,
        thickness: f32,
        normal_averaging: bool,
        constraint: &mut ContactConstraint,
    ) {
        match (particle, levelset) {
            (Shape::Box(a), Shape::Box(b)) => {
                BoxPairTester::update(a, particle_pose, b, levelset_pose, thickness, constraint);
            }
            (Shape::Sphere(a), Shape::Sphere(b)) => {
                SpherePairTester::update(a, particle_pose, b, levelset_pose, constraint);
            }
            (Shape::Box(b), Shape::Plane(p)) => {
                BoxPlaneTester::update(b, particle_pose, p, levelset_pose, constraint);
            }
            (Shape::Sphere(s), Shape::Plane(p)) => {
                SpherePlaneTester::update(s, particle_pose, p, levelset_pose, constraint);
            }
            (Shape::Sphere(s), Shape::Box(b)) => {
                SphereBoxTester::update(s, particle_pose, b, levelset_pose, constraint);
            }
            (Shape::Plane(p), Shape::Box(b)) => Self::mirrored(constraint, |tmp| {
                BoxPlaneTester::update(b, levelset_pose, p, particle_pose, tmp);
            }),
            (Shape::Plane(p), Shape::Sphere(s)) => Self::mirrored(constraint, |tmp| {
                SpherePlaneTester::update(s, levelset_pose, p, particle_pose, tmp);
            }),
            (Shape::Box(b), Shape::Sphere(s)) => Self::mirrored(constraint, |tmp| {
                SphereBoxTester::update(s, levelset_pose, b, particle_pose, tmp);
            }),
            (Shape::Union(_), Shape::Union(_)) => UnionTester::update_union_union(
                particle,
                particle_pose,
                levelset,
                levelset_pose,
                thickness,
                constraint,
                |inner_particle, inner_particle_pose, inner_levelset, inner_levelset_pose, constraint| {
                    Self::update_shape_pair(
                        inner_particle,
                        inner_particle_pose,
                        inner_levelset,
                        inner_levelset_pose,
                        samples,
                        thickness,
                        normal_averaging,
                        constraint,
                    )
                },
            ),
            (_, Shape::Union(_)) => UnionTester::update_single_union(
                particle,
                particle_pose,
                levelset,
                levelset_pose,
                thickness,
                constraint,
                |inner_particle, inner_particle_pose, inner_levelset, inner_levelset_pose, constraint| {
                    Self::update_shape_pair(
                        inner_particle,
                        inner_particle_pose,
                        inner_levelset,
                        inner_levelset_pose,
                        samples,
                        thickness,
                        normal_averaging,
                        constraint,
                    )
                },
            ),
            (Shape::Union(_), _) => {
                for (inner, inner_pose) in
                    UnionTester::find_relevant_shapes(levelset, levelset_pose, particle, particle_pose, thickness)
                {
                    Self::update_shape_pair(
                        inner,
                        &inner_pose,
                        levelset,
                        levelset_pose,
                        samples,
                        thickness,
                        normal_averaging,
                        constraint,
                    );
                }
            }
            _ => {
                if let Some(posed) = samples {
                    LevelsetTester::sample_object(
                        levelset,
                        levelset_pose,
                        posed.samples,
                        &posed.pose,
                        thickness,
                        normal_averaging,
                        constraint,
                    );
                }
            }
        }
    }

    /// Runs a test with the roles reversed and keeps the result, with the normal flipped back, if deeper.
    fn mirrored(constraint: &mut ContactConstraint, test: impl FnOnce(&mut ContactConstraint)) {
        let mut tmp = *constraint;
        test(&mut tmp);
        if tmp.phi < constraint.phi {
            constraint.phi = tmp.phi;
            constraint.normal = -tmp.normal;
            constraint.location = tmp.location;
        }
    }

    /// Resolves every candidate pair into a constraint, keeping only those closer than their thickness.
    ///
    /// Output order follows candidate order, so the result does not depend on the dispatcher.
    pub fn detect(
        particles: &ParticleSet,
        candidates: &[CandidatePair],
        normal_averaging: bool,
        dispatcher: &ThreadDispatcher,
    ) -> Vec<ContactConstraint> {
        dispatcher
            .map(candidates, |pair| {
                let mut constraint = Self::compute_constraint(particles, pair.body1, pair.body2, pair.thickness);
                Self::update_constraint(particles, pair.thickness, normal_averaging, &mut constraint);
                (constraint.phi < pair.thickness).then_some(constraint)
            })
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_description::RigidBodyDescription;
    use crate::physics::collidables::box_shape::BoxShape;
    use crate::physics::collidables::implicit_union::{ImplicitUnion, UnionChild};
    use crate::physics::collidables::level_set::LevelSet;
    use crate::physics::collidables::plane::Plane;
    use crate::physics::collidables::sphere::Sphere;
    use crate::utilities::bounding_box::BoundingBox;
    use glam::Vec3;

    fn dynamic(particles: &mut ParticleSet, shape: Shape, position: Vec3) -> usize {
        particles.create_rigid_body(&RigidBodyDescription::create_dynamic_no_velocity(
            RigidPose::from_position(position),
            shape,
            1.0,
        ))
    }

    fn ground(particles: &mut ParticleSet) -> usize {
        particles.create_rigid_body(&RigidBodyDescription::create_static(
            RigidPose::IDENTITY,
            Shape::Plane(Plane::ground()),
        ))
    }

    #[test]
    fn plane_is_always_the_levelset() {
        let mut particles = ParticleSet::new();
        let plane = ground(&mut particles);
        let sphere = dynamic(&mut particles, Shape::Sphere(Sphere::new(1.0)), Vec3::new(0.0, 0.0, 0.5));
        let constraint = NarrowPhase::compute_constraint(&particles, plane, sphere, 0.0);
        assert_eq!(constraint.particle_index, sphere);
        assert_eq!(constraint.levelset_index, plane);
        let constraint = NarrowPhase::compute_constraint(&particles, sphere, plane, 0.0);
        assert_eq!(constraint.particle_index, sphere);
    }

    #[test]
    fn sphere_probes_box_regardless_of_order() {
        let mut particles = ParticleSet::new();
        let box_body = dynamic(&mut particles, Shape::Box(BoxShape::new(2.0, 2.0, 2.0)), Vec3::ZERO);
        let sphere = dynamic(&mut particles, Shape::Sphere(Sphere::new(0.5)), Vec3::new(0.0, 0.0, 1.25));
        let mut constraint = NarrowPhase::compute_constraint(&particles, box_body, sphere, 0.0);
        assert_eq!(constraint.particle_index, sphere);
        NarrowPhase::update_constraint(&particles, 0.0, true, &mut constraint);
        assert!((constraint.phi + 0.25).abs() < 1e-5);
        assert!(constraint.normal.abs_diff_eq(Vec3::Z, 1e-5));
    }

    #[test]
    fn mirrored_pair_flips_the_normal() {
        let mut particles = ParticleSet::new();
        let sphere = dynamic(&mut particles, Shape::Sphere(Sphere::new(1.0)), Vec3::new(0.0, 0.0, 0.75));
        let plane = ground(&mut particles);
        let mut constraint = ContactConstraint::new(plane, sphere, 0.0);
        NarrowPhase::update_constraint(&particles, 0.0, true, &mut constraint);
        assert!((constraint.phi + 0.25).abs() < 1e-5);
        assert!(constraint.normal.abs_diff_eq(-Vec3::Z, 1e-5));
    }

    #[test]
    fn union_particle_is_decomposed() {
        let mut particles = ParticleSet::new();
        let plane = ground(&mut particles);
        let dumbbell = Shape::Union(ImplicitUnion::new(vec![
            UnionChild {
                shape: Shape::Sphere(Sphere::new(1.0)),
                pose: RigidPose::from_position(Vec3::new(-2.0, 0.0, 0.0)),
            },
            UnionChild {
                shape: Shape::Sphere(Sphere::new(1.0)),
                pose: RigidPose::from_position(Vec3::new(2.0, 0.0, -0.5)),
            },
        ]));
        let body = dynamic(&mut particles, dumbbell, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(NarrowPhase::compute_constraint(&particles, plane, body, 0.0).particle_index, body);
        let mut constraint = NarrowPhase::compute_constraint(&particles, body, plane, 0.0);
        assert_eq!(constraint.particle_index, body);
        NarrowPhase::update_constraint(&particles, 0.0, true, &mut constraint);
        assert!((constraint.phi + 0.5).abs() < 1e-5);
        assert!(constraint.normal.abs_diff_eq(Vec3::Z, 1e-5));
    }

    #[test]
    fn levelset_falls_back_to_sampling() {
        let mut particles = ParticleSet::new();
        let bounds = BoundingBox::new(Vec3::splat(-2.0), Vec3::splat(2.0));
        let ball = LevelSet::from_fn(bounds, 0.5, 24, |p| p.length() - 1.5);
        let levelset_body = particles.create_rigid_body(&RigidBodyDescription::create_static(
            RigidPose::IDENTITY,
            Shape::LevelSet(ball),
        ));
        let box_body = dynamic(
            &mut particles,
            Shape::Box(BoxShape::new(1.0, 1.0, 1.0)),
            Vec3::new(0.0, 0.0, 1.75),
        );
        let mut constraint = NarrowPhase::compute_constraint(&particles, box_body, levelset_body, 0.0);
        assert_eq!(constraint.particle_index, box_body);
        NarrowPhase::update_constraint(&particles, 0.0, false, &mut constraint);
        assert!(constraint.phi < 0.0);
        assert!(constraint.normal.z > 0.5);
    }

    #[test]
    fn detect_keeps_only_close_pairs() {
        let mut particles = ParticleSet::new();
        let plane = ground(&mut particles);
        let touching = dynamic(&mut particles, Shape::Sphere(Sphere::new(1.0)), Vec3::new(0.0, 0.0, 0.9));
        let far = dynamic(&mut particles, Shape::Sphere(Sphere::new(1.0)), Vec3::new(5.0, 0.0, 3.0));
        let candidates = [
            CandidatePair {
                body1: touching,
                body2: plane,
                thickness: 0.0,
            },
            CandidatePair {
                body1: far,
                body2: plane,
                thickness: 0.0,
            },
        ];
        let constraints = NarrowPhase::detect(&particles, &candidates, true, &ThreadDispatcher::serial());
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].particle_index, touching);
    }
}
