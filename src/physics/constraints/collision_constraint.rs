use std::fmt;

use glam::{Mat3, Quat, Vec3};

use crate::physics::body_properties::RigidPose;
use crate::physics::collision_detection::broad_phase::{BroadPhase, PairExclusions};
use crate::physics::collision_detection::contact::ContactConstraint;
use crate::physics::collision_detection::contact_graph::ContactGraph;
use crate::physics::collision_detection::narrow_phase::NarrowPhase;
use crate::physics::constraints::impulse::{
    compute_factor_matrix, energy_clamped_impulse, inverse_factor, ContactBody,
};
use crate::physics::particles::{BodyState, ParticleSet};
use crate::physics::solver_config::{ShockPropagation, SolverConfig};
use crate::utilities::math_helper::{rotate_tensor, safe_normal, sign, skew_symmetric, SMALL_NUMBER};
use crate::utilities::thread_dispatcher::ThreadDispatcher;

/// Outcome of one `apply_push_out` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOutReport {
    /// Passes actually run. Stops early once a pass finds nothing penetrating.
    pub iterations: u32,
    /// Smallest phi observed during each pass, or infinity for a pass that saw no contacts.
    pub deepest_phi: Vec<f32>,
}

/// New state of both bodies of a resolved contact. Only movable bodies carry a state.
#[derive(Debug, Clone, Copy)]
struct Resolution {
    particle: Option<BodyState>,
    levelset: Option<BodyState>,
    collided: bool,
}

impl Resolution {
    const SKIPPED: Self = Self {
        particle: None,
        levelset: None,
        collided: false,
    };
}

#[derive(Debug, Clone, Copy)]
struct PushOutResolution {
    particle: Option<BodyState>,
    levelset: Option<BodyState>,
    deepest_phi: f32,
    penetrating: bool,
}

/// Contacts of one evolution for the current sub-step, with the structures used to find and order them.
///
/// Constraints are regenerated every sub-step. Resolution walks the contact graph level by level and color
/// by color; every bucket is solved against a snapshot of the bodies and the results are scattered back
/// afterwards, which gives the same answer as solving the bucket in place because its contacts never share
/// a dynamic body.
#[derive(Debug, Default)]
pub struct CollisionConstraints {
    constraints: Vec<ContactConstraint>,
    graph: ContactGraph,
    broad_phase: BroadPhase,
}

impl CollisionConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn constraints(&self) -> &[ContactConstraint] {
        &self.constraints
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    #[inline]
    pub fn graph(&self) -> &ContactGraph {
        &self.graph
    }

    #[inline]
    pub fn broad_phase(&self) -> &BroadPhase {
        &self.broad_phase
    }

    /// Replaces the contact set. The graph is stale until the next `update_graph`.
    pub fn set_constraints(&mut self, constraints: Vec<ContactConstraint>) {
        self.constraints = constraints;
        self.graph.clear();
    }

    /// Runs the broad and narrow phase against the predicted poses.
    pub fn compute_constraints(
        &mut self,
        particles: &ParticleSet,
        dt: f32,
        config: &SolverConfig,
        exclusions: &PairExclusions,
        dispatcher: &ThreadDispatcher,
    ) {
        self.constraints.clear();
        self.graph.clear();
        if !config.collisions_enabled {
            return;
        }
        self.broad_phase.build(particles, dt, config);
        let candidates = self.broad_phase.find_candidate_pairs(particles, config, exclusions, dispatcher);
        self.constraints = NarrowPhase::detect(particles, &candidates, config.normal_averaging, dispatcher);
        tracing::trace!(candidates = candidates.len(), contacts = self.constraints.len(), "contacts generated");
    }

    /// Rebuilds islands, levels and colors and writes island ids back to the bodies.
    pub fn update_graph(&mut self, particles: &mut ParticleSet) {
        self.graph.build(particles, &self.constraints);
    }

    /// Drops every contact touching one of `retired`.
    pub fn remove_constraints(&mut self, retired: &[usize]) {
        let before = self.constraints.len();
        self.constraints
            .retain(|constraint| !retired.iter().any(|&index| constraint.involves(index)));
        if self.constraints.len() != before {
            self.graph.clear();
        }
    }

    pub fn clear(&mut self) {
        self.constraints.clear();
        self.graph.clear();
    }

    /// Velocity solve. Runs `apply_iterations` sweeps over the contact graph.
    pub fn apply(&mut self, particles: &mut ParticleSet, dt: f32, config: &SolverConfig, dispatcher: &ThreadDispatcher) {
        let Self { constraints, graph, .. } = self;
        for _ in 0..config.apply_iterations {
            for level in graph.batches() {
                for bucket in level {
                    let mut batch: Vec<ContactConstraint> = bucket.iter().map(|&index| constraints[index]).collect();
                    let resolutions = {
                        let snapshot: &ParticleSet = particles;
                        dispatcher.map_mut(&mut batch, |constraint| Self::apply_single(snapshot, constraint, dt, config))
                    };
                    for ((&index, constraint), resolution) in bucket.iter().zip(batch).zip(resolutions) {
                        constraints[index] = constraint;
                        if resolution.collided {
                            particles.collided[constraint.particle_index] = true;
                            particles.collided[constraint.levelset_index] = true;
                        }
                        if let Some(state) = resolution.particle {
                            particles.write_state(constraint.particle_index, state);
                        }
                        if let Some(state) = resolution.levelset {
                            particles.write_state(constraint.levelset_index, state);
                        }
                    }
                }
            }
        }
    }

    fn contact_body(particles: &ParticleSet, index: usize, location: Vec3) -> ContactBody {
        ContactBody {
            v: particles.v[index],
            w: particles.w[index],
            m: particles.m[index],
            inv_m: particles.inv_m[index],
            inv_i: particles.world_space_inv_inertia(index),
            r: location - particles.p[index],
        }
    }

    fn apply_single(particles: &ParticleSet, constraint: &mut ContactConstraint, dt: f32, config: &SolverConfig) -> Resolution {
        let particle_index = constraint.particle_index;
        let levelset_index = constraint.levelset_index;
        if particles.sleeping[particle_index] {
            debug_assert!(
                particles.inv_m[levelset_index] == 0.0 || particles.sleeping[levelset_index],
                "sleeping body {particle_index} is in contact with awake body {levelset_index}"
            );
            return Resolution::SKIPPED;
        }
        if particles.sleeping[levelset_index] {
            return Resolution::SKIPPED;
        }

        NarrowPhase::update_constraint(particles, config.thickness, config.normal_averaging, constraint);
        if constraint.phi >= config.thickness {
            return Resolution::SKIPPED;
        }

        let normal = constraint.normal;
        let body0 = Self::contact_body(particles, particle_index, constraint.location);
        let body1 = Self::contact_body(particles, levelset_index, constraint.location);
        let relative_velocity = body0.point_velocity() - body1.point_velocity();
        let relative_normal_velocity = relative_velocity.dot(normal);
        if relative_normal_velocity >= 0.0 {
            return Resolution {
                collided: true,
                ..Resolution::SKIPPED
            };
        }

        let factor = body0.factor_matrix() + body1.factor_matrix();
        // Resting contacts would otherwise bounce off gravity's own velocity every step.
        let restitution = if relative_velocity.length() < 2.0 * config.resting_contact_gravity * dt {
            0.0
        } else {
            config.restitution
        };

        let mut angular_impulse = Vec3::ZERO;
        let impulse = if config.friction > 0.0 {
            let velocity_change = -(restitution * relative_normal_velocity * normal + relative_velocity);
            let normal_velocity_change = velocity_change.dot(normal);
            let minimal_impulse = inverse_factor(&factor).map(|inverse| inverse * velocity_change);
            let within_cone = minimal_impulse.filter(|minimal| {
                let minimal_normal = minimal.dot(normal);
                let tangential = (*minimal - minimal_normal * normal).length();
                tangential <= config.friction * minimal_normal
            });
            match within_cone {
                Some(mut impulse) => {
                    if config.angular_friction > 0.0 {
                        let (delta_impulse, delta_angular) = Self::angular_friction(
                            particles,
                            &body0,
                            &body1,
                            particle_index,
                            levelset_index,
                            normal,
                            normal_velocity_change,
                            config.angular_friction,
                        );
                        impulse += delta_impulse;
                        angular_impulse += delta_angular;
                    }
                    impulse
                }
                None => {
                    let tangent = safe_normal(relative_velocity - relative_normal_velocity * normal);
                    let direction = normal - config.friction * tangent;
                    let denominator = Self::checked_denominator(normal.dot(factor * direction), constraint);
                    direction * (-(1.0 + restitution) * relative_normal_velocity / denominator)
                }
            }
        } else {
            let denominator = Self::checked_denominator(normal.dot(factor * normal), constraint);
            normal * (-(1.0 + restitution) * relative_normal_velocity / denominator)
        };

        let impulse = energy_clamped_impulse(&body0, &body1, impulse);
        constraint.accumulated_impulse += impulse;

        let particle = body0.is_dynamic().then(|| {
            let delta_w = body0.inv_i * (body0.r.cross(impulse) + angular_impulse);
            Self::integrate_change(particles.state(particle_index), body0.inv_m * impulse, delta_w, dt)
        });
        let levelset = body1.is_dynamic().then(|| {
            let delta_w = body1.inv_i * (body1.r.cross(-impulse) - angular_impulse);
            Self::integrate_change(particles.state(levelset_index), -body1.inv_m * impulse, delta_w, dt)
        });
        Resolution {
            particle,
            levelset,
            collided: true,
        }
    }

    fn checked_denominator(denominator: f32, constraint: &ContactConstraint) -> f32 {
        if denominator.abs() > SMALL_NUMBER && denominator.is_finite() {
            denominator
        } else {
            tracing::warn!(%constraint, denominator, "degenerate contact denominator, using 1");
            1.0
        }
    }

    /// Applies a velocity change and the matching position change over `dt`.
    #[inline]
    fn integrate_change(mut state: BodyState, delta_v: Vec3, delta_w: Vec3, dt: f32) -> BodyState {
        state.v += delta_v;
        state.w += delta_w;
        state.p += delta_v * dt;
        let spin = Quat::from_xyzw(delta_w.x, delta_w.y, delta_w.z, 0.0) * state.q;
        state.q = (state.q + spin * (0.5 * dt)).normalize();
        state
    }

    /// Extra impulse and angular impulse that damp relative spin around and across the normal.
    #[allow(clippy::too_many_arguments)]
    fn angular_friction(
        particles: &ParticleSet,
        body0: &ContactBody,
        body1: &ContactBody,
        particle_index: usize,
        levelset_index: usize,
        normal: Vec3,
        normal_velocity_change: f32,
        angular_friction: f32,
    ) -> (Vec3, Vec3) {
        let relative_angular = body0.w - body1.w;
        let angular_normal = relative_angular.dot(normal);
        let angular_tangent = relative_angular - angular_normal * normal;
        let limit = angular_friction * normal_velocity_change;
        let final_angular = sign(angular_normal) * (angular_normal.abs() - limit).max(0.0) * normal
            + (angular_tangent.length() - limit).max(0.0) * safe_normal(angular_tangent);
        let delta = final_angular - relative_angular;

        if !body0.is_dynamic() {
            let inertia = particles.world_space_inertia(levelset_index);
            let impulse_delta = body1.m * body1.r.cross(delta);
            (impulse_delta, inertia * delta - body1.r.cross(impulse_delta))
        } else if !body1.is_dynamic() {
            let inertia = particles.world_space_inertia(particle_index);
            let impulse_delta = body0.m * body0.r.cross(delta);
            (impulse_delta, inertia * delta - body0.r.cross(impulse_delta))
        } else {
            let cross0 = skew_symmetric(body0.r);
            let cross1 = skew_symmetric(body1.r);
            let cross_inertia0 = cross0 * body0.inv_i;
            let cross_inertia1 = cross1 * body1.inv_i;
            let diag1 = cross_inertia0 * cross0.transpose()
                + cross_inertia1 * cross1.transpose()
                + Mat3::from_diagonal(Vec3::splat(body0.inv_m + body1.inv_m));
            let off_diag1 = -(cross_inertia0 + cross_inertia1);
            let Some(diag2) = inverse_factor(&(body0.inv_i + body1.inv_i)) else {
                return (Vec3::ZERO, Vec3::ZERO);
            };
            let off_diag1_diag2 = off_diag1 * diag2;
            let Some(schur) = inverse_factor(&(diag1 - off_diag1_diag2 * off_diag1.transpose())) else {
                return (Vec3::ZERO, Vec3::ZERO);
            };
            let impulse_delta = schur * (off_diag1_diag2 * delta);
            (impulse_delta, diag2 * (delta - off_diag1.transpose() * impulse_delta))
        }
    }

    /// Position solve. Pushes penetrating bodies apart, ramping the correction up over the passes.
    pub fn apply_push_out(
        &mut self,
        particles: &mut ParticleSet,
        config: &SolverConfig,
        dispatcher: &ThreadDispatcher,
    ) -> PushOutReport {
        let Self { constraints, graph, .. } = self;
        let iterations = config.push_out_iterations.max(1);
        let mut temporarily_static = vec![false; particles.len()];
        let mut report = PushOutReport::default();

        let mut needs_another_iteration = true;
        let mut iteration = 0;
        while iteration < iterations && (iteration == 0 || needs_another_iteration) {
            needs_another_iteration = false;
            let freeze = match config.shock_propagation {
                ShockPropagation::Disabled => false,
                ShockPropagation::FinalIteration => iteration + 1 == iterations,
                ShockPropagation::EveryIteration => true,
            };
            temporarily_static.fill(false);
            let scale = (iteration + 2).min(iterations) as f32 / iterations as f32;
            let mut deepest_phi = f32::INFINITY;

            for level in graph.batches() {
                for bucket in level {
                    let mut batch: Vec<ContactConstraint> = bucket.iter().map(|&index| constraints[index]).collect();
                    let resolutions = {
                        let snapshot: &ParticleSet = particles;
                        let frozen: &[bool] = &temporarily_static;
                        dispatcher.map_mut(&mut batch, |constraint| {
                            Self::push_out_single(snapshot, constraint, config, scale, frozen)
                        })
                    };
                    for ((&index, constraint), resolution) in bucket.iter().zip(batch).zip(resolutions) {
                        constraints[index] = constraint;
                        deepest_phi = deepest_phi.min(resolution.deepest_phi);
                        needs_another_iteration |= resolution.penetrating;
                        if let Some(state) = resolution.particle {
                            particles.write_state(constraint.particle_index, state);
                        }
                        if let Some(state) = resolution.levelset {
                            particles.write_state(constraint.levelset_index, state);
                        }
                    }
                }
                if freeze {
                    for &index in level.iter().flatten() {
                        let constraint = &constraints[index];
                        let (particle, levelset) = (constraint.particle_index, constraint.levelset_index);
                        let particle_fixed = particles.inv_m[particle] == 0.0 || temporarily_static[particle];
                        let levelset_fixed = particles.inv_m[levelset] == 0.0 || temporarily_static[levelset];
                        if particle_fixed {
                            temporarily_static[levelset] = true;
                        } else if levelset_fixed {
                            temporarily_static[particle] = true;
                        }
                    }
                }
            }

            report.deepest_phi.push(deepest_phi);
            iteration += 1;
        }
        report.iterations = iteration;
        tracing::trace!(passes = report.iterations, "push out finished");
        report
    }

    fn push_out_single(
        particles: &ParticleSet,
        constraint: &mut ContactConstraint,
        config: &SolverConfig,
        scale: f32,
        temporarily_static: &[bool],
    ) -> PushOutResolution {
        let particle_index = constraint.particle_index;
        let levelset_index = constraint.levelset_index;
        let mut resolution = PushOutResolution {
            particle: None,
            levelset: None,
            deepest_phi: f32::INFINITY,
            penetrating: false,
        };
        if particles.sleeping[particle_index] || particles.sleeping[levelset_index] {
            return resolution;
        }
        let movable0 = particles.inv_m[particle_index] != 0.0 && !temporarily_static[particle_index];
        let movable1 = particles.inv_m[levelset_index] != 0.0 && !temporarily_static[levelset_index];
        let mut state0 = particles.state(particle_index);
        let mut state1 = particles.state(levelset_index);

        for _ in 0..config.push_out_pair_iterations {
            NarrowPhase::update_constraint_at(
                particles,
                &RigidPose::new(state0.p, state0.q),
                &RigidPose::new(state1.p, state1.q),
                config.thickness,
                config.normal_averaging,
                constraint,
            );
            resolution.deepest_phi = resolution.deepest_phi.min(constraint.phi);
            if constraint.phi >= config.thickness {
                break;
            }
            resolution.penetrating = true;

            let r0 = constraint.location - state0.p;
            let r1 = constraint.location - state1.p;
            let inv_i0 = rotate_tensor(state0.q, &particles.inv_i[particle_index]);
            let inv_i1 = rotate_tensor(state1.q, &particles.inv_i[levelset_index]);
            let mut factor = Mat3::ZERO;
            if movable0 {
                factor += compute_factor_matrix(r0, &inv_i0, particles.inv_m[particle_index]);
            }
            if movable1 {
                factor += compute_factor_matrix(r1, &inv_i1, particles.inv_m[levelset_index]);
            }
            let Some(inverse) = inverse_factor(&factor) else {
                break;
            };
            let impulse = inverse * ((config.thickness - constraint.phi) * scale * constraint.normal);
            if movable0 {
                state0.p += particles.inv_m[particle_index] * impulse;
                state0.q = (Quat::from_scaled_axis(inv_i0 * r0.cross(impulse)) * state0.q).normalize();
                resolution.particle = Some(state0);
            }
            if movable1 {
                state1.p -= particles.inv_m[levelset_index] * impulse;
                state1.q = (Quat::from_scaled_axis(inv_i1 * r1.cross(-impulse)) * state1.q).normalize();
                resolution.levelset = Some(state1);
            }
        }
        resolution
    }
}

impl fmt::Display for PushOutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PushOut<{} passes> deepest: {:?}", self.iterations, self.deepest_phi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_description::RigidBodyDescription;
    use crate::physics::body_properties::BodyVelocity;
    use crate::physics::collidables::plane::Plane;
    use crate::physics::collidables::shape::Shape;
    use crate::physics::collidables::sphere::Sphere;

    fn sphere(particles: &mut ParticleSet, z: f32) -> usize {
        particles.create_rigid_body(&RigidBodyDescription::create_dynamic_no_velocity(
            RigidPose::from_position(Vec3::new(0.0, 0.0, z)),
            Shape::Sphere(Sphere::new(1.0)),
            1.0,
        ))
    }

    fn ground(particles: &mut ParticleSet) -> usize {
        particles.create_rigid_body(&RigidBodyDescription::create_static(
            RigidPose::IDENTITY,
            Shape::Plane(Plane::ground()),
        ))
    }

    fn solve(particles: &mut ParticleSet, config: &SolverConfig) -> (CollisionConstraints, PushOutReport) {
        let mut collisions = CollisionConstraints::new();
        let dispatcher = ThreadDispatcher::serial();
        collisions.compute_constraints(particles, 1.0 / 60.0, config, &PairExclusions::default(), &dispatcher);
        collisions.update_graph(particles);
        let report = collisions.apply_push_out(particles, config, &dispatcher);
        (collisions, report)
    }

    #[test]
    fn overlapping_spheres_are_separated() {
        let mut particles = ParticleSet::new();
        let a = sphere(&mut particles, 0.0);
        let b = sphere(&mut particles, 1.5);
        let config = SolverConfig {
            gravity: Vec3::ZERO,
            ..Default::default()
        };
        let (collisions, report) = solve(&mut particles, &config);
        assert_eq!(collisions.len(), 1);
        assert!((report.deepest_phi[0] + 0.5).abs() < 1e-5);
        let gap = (particles.p(b) - particles.p(a)).length() - 2.0;
        assert!(gap >= -1e-4, "gap {gap}");
        // Equal masses share the correction.
        assert!((particles.p(a).z + 0.25).abs() < 1e-4);
    }

    #[test]
    fn static_bodies_never_move() {
        let mut particles = ParticleSet::new();
        let plane = ground(&mut particles);
        let ball = sphere(&mut particles, 0.5);
        particles
            .set_velocity(ball, BodyVelocity::from_linear(Vec3::new(0.0, 0.0, -10.0)))
            .unwrap();
        let config = SolverConfig::default();
        let dispatcher = ThreadDispatcher::serial();
        let mut collisions = CollisionConstraints::new();
        collisions.compute_constraints(&particles, 1.0 / 60.0, &config, &PairExclusions::default(), &dispatcher);
        collisions.update_graph(&mut particles);
        collisions.apply(&mut particles, 1.0 / 60.0, &config, &dispatcher);
        collisions.apply_push_out(&mut particles, &config, &dispatcher);
        assert_eq!(particles.p(plane), Vec3::ZERO);
        assert_eq!(particles.v(plane), Vec3::ZERO);
        assert!(particles.v(ball).z.abs() < 1e-4);
        assert!(particles.p(ball).z >= 1.0 - 1e-4);
        assert!(particles.collided(ball));
    }

    #[test]
    fn separating_contacts_receive_no_impulse() {
        let mut particles = ParticleSet::new();
        ground(&mut particles);
        let ball = sphere(&mut particles, 0.9);
        particles
            .set_velocity(ball, BodyVelocity::from_linear(Vec3::new(0.0, 0.0, 5.0)))
            .unwrap();
        let config = SolverConfig::default();
        let dispatcher = ThreadDispatcher::serial();
        let mut collisions = CollisionConstraints::new();
        collisions.compute_constraints(&particles, 1.0 / 60.0, &config, &PairExclusions::default(), &dispatcher);
        collisions.update_graph(&mut particles);
        collisions.apply(&mut particles, 1.0 / 60.0, &config, &dispatcher);
        assert_eq!(particles.v(ball), Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(collisions.constraints()[0].accumulated_impulse, Vec3::ZERO);
    }

    #[test]
    fn static_friction_stops_sliding() {
        let mut particles = ParticleSet::new();
        ground(&mut particles);
        let ball = sphere(&mut particles, 0.95);
        particles
            .set_velocity(ball, BodyVelocity::from_linear(Vec3::new(1.0, 0.0, -5.0)))
            .unwrap();
        let config = SolverConfig {
            friction: 1.0,
            ..Default::default()
        };
        let dispatcher = ThreadDispatcher::serial();
        let mut collisions = CollisionConstraints::new();
        collisions.compute_constraints(&particles, 1.0 / 60.0, &config, &PairExclusions::default(), &dispatcher);
        collisions.update_graph(&mut particles);
        let before = particles.kinetic_energy(ball);
        collisions.apply(&mut particles, 1.0 / 60.0, &config, &dispatcher);
        let contact_velocity = particles.v(ball) + particles.w(ball).cross(Vec3::new(0.0, 0.0, -1.0));
        assert!(contact_velocity.length() < 1e-3, "{contact_velocity}");
        assert!(particles.kinetic_energy(ball) <= before);
    }

    #[test]
    fn removing_constraints_for_retired_bodies() {
        let mut particles = ParticleSet::new();
        ground(&mut particles);
        let a = sphere(&mut particles, 0.9);
        let b = sphere(&mut particles, 5.0);
        let mut collisions = CollisionConstraints::new();
        collisions.set_constraints(vec![
            ContactConstraint::new(a, 0, 0.0),
            ContactConstraint::new(b, 0, 0.0),
        ]);
        collisions.remove_constraints(&[b]);
        assert_eq!(collisions.len(), 1);
        assert!(collisions.constraints()[0].involves(a));
    }
}
