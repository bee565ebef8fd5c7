use crossbeam_utils::sync::ShardedLockWriteGuard;
use glam::Vec3;

use crate::error::PhysicsError;
use crate::physics::body_description::{BodyKind, RigidBodyDescription};
use crate::physics::body_properties::RigidPose;
use crate::physics::collision_detection::broad_phase::PairExclusions;
use crate::physics::constraints::collision_constraint::{CollisionConstraints, PushOutReport};
use crate::physics::events::{CollisionEvent, EventGatherer, TrailingEvent};
use crate::physics::handles::{EvolutionId, IndexRemap, ProxyId};
use crate::physics::island_sleeper::IslandSleeper;
use crate::physics::particles::ParticleSet;
use crate::physics::pose_integration::PoseIntegration;
use crate::physics::simulation_profiler::{stages, SimulationProfiler};
use crate::physics::solver_config::SolverConfig;
use crate::physics::timestepper::{Timestepper, TimestepperStage, TimestepperStageHandler};
use crate::threading::proxy::ProxyBinding;
use crate::utilities::math_helper::is_finite_quat;
use crate::utilities::thread_dispatcher::ThreadDispatcher;

/// One physics world: bodies, their contacts, the proxies feeding and reading it, and the frame pipeline.
///
/// Only the physics thread touches an evolution. Callers reach it through solver commands.
pub struct Evolution {
    id: EvolutionId,
    particles: ParticleSet,
    collisions: CollisionConstraints,
    config: SolverConfig,
    dispatcher: ThreadDispatcher,
    timestepper: Timestepper,
    proxies: Vec<ProxyBinding>,
    exclusions: PairExclusions,
    events: EventGatherer,
    profiler: SimulationProfiler,
    last_push_out: PushOutReport,
    time: f32,
    last_frame_substeps: usize,
}

impl std::fmt::Debug for Evolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evolution")
            .field("id", &self.id)
            .field("particles", &self.particles.len())
            .field("proxies", &self.proxies.len())
            .field("time", &self.time)
            .finish()
    }
}

impl Evolution {
    pub fn new(id: EvolutionId, config: SolverConfig) -> Self {
        let config = config.sanitized();
        Self {
            id,
            particles: ParticleSet::new(),
            collisions: CollisionConstraints::new(),
            dispatcher: ThreadDispatcher::from_worker_count(config.worker_threads, config.parallel),
            config,
            timestepper: Timestepper::new(),
            proxies: Vec::new(),
            exclusions: PairExclusions::default(),
            events: EventGatherer::new(),
            profiler: SimulationProfiler::new(16),
            last_push_out: PushOutReport::default(),
            time: 0.0,
            last_frame_substeps: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> EvolutionId {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Edits the solver settings. The result is sanitized before it takes effect.
    pub fn update_config(&mut self, update: impl FnOnce(&mut SolverConfig)) {
        let mut config = self.config.clone();
        update(&mut config);
        let config = config.sanitized();
        if config.worker_threads != self.config.worker_threads || config.parallel != self.config.parallel {
            self.dispatcher = ThreadDispatcher::from_worker_count(config.worker_threads, config.parallel);
        }
        self.config = config;
    }

    #[inline]
    pub fn particles(&self) -> &ParticleSet {
        &self.particles
    }

    #[inline]
    pub fn particles_mut(&mut self) -> &mut ParticleSet {
        &mut self.particles
    }

    #[inline]
    pub fn collision_constraints(&self) -> &CollisionConstraints {
        &self.collisions
    }

    /// Simulated seconds since creation.
    #[inline]
    pub fn time(&self) -> f32 {
        self.time
    }

    #[inline]
    pub fn profiler(&self) -> &SimulationProfiler {
        &self.profiler
    }

    /// Sub-steps run by the last `advance_by`.
    #[inline]
    pub fn last_frame_substeps(&self) -> usize {
        self.last_frame_substeps
    }

    /// Push-out report of the last sub-step.
    #[inline]
    pub fn last_push_out(&self) -> &PushOutReport {
        &self.last_push_out
    }

    #[inline]
    pub fn collision_events(&self) -> &[CollisionEvent] {
        self.events.collision_events()
    }

    #[inline]
    pub fn trailing_events(&self) -> &[TrailingEvent] {
        self.events.trailing_events()
    }

    pub fn add_stage_handler(&mut self, stage: TimestepperStage, handler: TimestepperStageHandler) {
        self.timestepper.add_handler(stage, handler);
    }

    pub fn create_rigid_body(&mut self, description: &RigidBodyDescription) -> usize {
        self.particles.create_rigid_body(description)
    }

    /// Retires a body and drops its contacts. The index stays reserved until `compact`.
    pub fn retire_body(&mut self, index: usize) -> Result<(), PhysicsError> {
        self.particles.retire(index)?;
        self.collisions.remove_constraints(&[index]);
        Ok(())
    }

    /// Reclaims retired rows and rewrites every index held by proxies.
    pub fn compact(&mut self) -> IndexRemap {
        let remap = self.particles.compact();
        for binding in &mut self.proxies {
            remap.apply(&mut binding.owned);
            binding.proxy.remap_indices(&remap);
        }
        self.collisions.clear();
        self.exclusions.clear();
        tracing::debug!(evolution = %self.id, bodies = self.particles.len(), "particles compacted");
        remap
    }

    pub fn add_force(&mut self, index: usize, force: Vec3) -> Result<(), PhysicsError> {
        self.particles.add_force(index, force)?;
        IslandSleeper::wake_island_of(&mut self.particles, index);
        Ok(())
    }

    pub fn add_torque(&mut self, index: usize, torque: Vec3) -> Result<(), PhysicsError> {
        self.particles.add_torque(index, torque)?;
        IslandSleeper::wake_island_of(&mut self.particles, index);
        Ok(())
    }

    /// Pushes every dynamic body within `radius` of `origin` away from it. The force falls off linearly to zero
    /// at `radius`; a negative `strength` pulls. Returns how many bodies were affected.
    pub fn add_radial_force(&mut self, origin: Vec3, strength: f32, radius: f32) -> usize {
        if !(radius > 0.0) || !strength.is_finite() {
            return 0;
        }
        let affected: Vec<(usize, Vec3)> = self
            .particles
            .active_indices()
            .filter(|&index| self.particles.is_dynamic(index))
            .filter_map(|index| {
                let offset = self.particles.x(index) - origin;
                let distance = offset.length();
                (distance < radius)
                    .then(|| (index, offset.normalize_or_zero() * strength * (1.0 - distance / radius)))
            })
            .collect();
        for &(index, force) in &affected {
            self.particles.external_force[index] += force;
            IslandSleeper::wake_island_of(&mut self.particles, index);
        }
        affected.len()
    }

    pub fn set_kinematic_target(&mut self, index: usize, target: RigidPose) -> Result<(), PhysicsError> {
        self.particles.set_kinematic_target(index, target)
    }

    /// Wakes the body and its whole island.
    pub fn wake(&mut self, index: usize) -> Result<(), PhysicsError> {
        self.particles.set_sleeping(index, false)?;
        IslandSleeper::wake_island_of(&mut self.particles, index);
        Ok(())
    }

    /// Puts the body and its whole island to sleep.
    pub fn put_to_sleep(&mut self, index: usize) -> Result<(), PhysicsError> {
        self.particles.set_sleeping(index, true)?;
        IslandSleeper::sleep_island_of(&mut self.particles, index);
        Ok(())
    }

    pub fn add_proxy(&mut self, binding: ProxyBinding) {
        tracing::debug!(evolution = %self.id, proxy = %binding.id(), "proxy added");
        self.proxies.push(binding);
    }

    /// Removes a proxy, hands its final results over and retires the bodies it owned. Returns false if the
    /// proxy is not registered here.
    pub fn remove_proxy(&mut self, id: ProxyId) -> bool {
        let Some(position) = self.proxies.iter().position(|binding| binding.id() == id) else {
            return false;
        };
        let mut binding = self.proxies.remove(position);
        binding.proxy.sync_before_destroy(&self.particles, &binding.owned);
        for &index in &binding.owned {
            if let Err(error) = self.particles.retire(index) {
                tracing::warn!(%error, proxy = %id, "owned body was already gone");
            }
        }
        self.collisions.remove_constraints(&binding.owned);
        tracing::debug!(evolution = %self.id, proxy = %id, bodies = binding.owned.len(), "proxy removed");
        true
    }

    #[inline]
    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    #[inline]
    pub fn has_proxies(&self) -> bool {
        !self.proxies.is_empty()
    }

    pub fn proxies(&self) -> &[ProxyBinding] {
        &self.proxies
    }

    /// Writes every proxy's results into the inactive half of its cache.
    pub fn cache_results(&mut self) {
        for binding in &mut self.proxies {
            binding.proxy.cache_results(&self.particles, &binding.owned);
        }
    }

    /// Swaps every proxy's cache halves. The caller holds the write half of the module's cache lock.
    pub fn flip_caches(&self, exclusive: &ShardedLockWriteGuard<'_, ()>) {
        for binding in &self.proxies {
            binding.proxy.flip_cache(exclusive);
        }
    }

    /// Advances the world by `dt`, split into sub-steps no longer than `max_step`.
    pub fn advance_by(&mut self, dt: f32) {
        self.profiler.clear();
        self.events.clear();
        self.exclusions.clear();
        self.particles.collided.fill(false);

        self.profiler.start(stages::CREATE_BODIES);
        for binding in &mut self.proxies {
            let first_new = binding.owned.len();
            binding.proxy.create_rigid_bodies(&mut self.particles, &mut binding.owned);
            if binding.owned.len() > first_new {
                tracing::trace!(proxy = %binding.id(), created = binding.owned.len() - first_new, "bodies created");
            }
        }
        for binding in &mut self.proxies {
            binding.proxy.parameter_update(&mut self.particles, &binding.owned, self.time);
        }
        for binding in &mut self.proxies {
            binding.proxy.disable_collisions(&binding.owned, &mut self.exclusions);
        }
        self.profiler.end(stages::CREATE_BODIES);

        for binding in &mut self.proxies {
            binding.proxy.start_frame(dt);
        }
        self.timestepper.invoke(TimestepperStage::FrameStarted, dt, &mut self.particles);

        let steps = Timestepper::substeps(dt, self.config.max_step);
        self.last_frame_substeps = steps.len();
        for step in steps {
            self.substep(step);
        }

        self.profiler.start(stages::EVENTS);
        self.events.gather_trailing(self.time, &self.particles, &self.config);
        self.profiler.end(stages::EVENTS);

        for binding in &mut self.proxies {
            binding.proxy.end_frame(dt);
        }
        self.timestepper.invoke(TimestepperStage::FrameEnded, dt, &mut self.particles);
        tracing::trace!(
            evolution = %self.id,
            dt,
            substeps = self.last_frame_substeps,
            contacts = self.collisions.len(),
            "frame advanced"
        );
    }

    fn substep(&mut self, dt: f32) {
        self.update_kinematics(dt);

        self.profiler.start(stages::FORCES);
        self.apply_forces(dt);
        self.profiler.end(stages::FORCES);
        self.timestepper.invoke(TimestepperStage::ForcesApplied, dt, &mut self.particles);
        self.reset_non_finite();

        PoseIntegration::predict(&mut self.particles, dt);

        self.profiler.start(stages::BROAD_PHASE);
        self.collisions
            .compute_constraints(&self.particles, dt, &self.config, &self.exclusions, &self.dispatcher);
        self.profiler.end(stages::BROAD_PHASE);

        self.profiler.start(stages::CONTACT_GRAPH);
        self.collisions.update_graph(&mut self.particles);
        IslandSleeper::reconcile(&mut self.particles, self.collisions.graph(), self.collisions.constraints());
        self.profiler.end(stages::CONTACT_GRAPH);
        self.timestepper.invoke(TimestepperStage::CollisionsDetected, dt, &mut self.particles);

        self.profiler.start(stages::APPLY);
        self.collisions.apply(&mut self.particles, dt, &self.config, &self.dispatcher);
        self.profiler.end(stages::APPLY);
        PoseIntegration::update_velocities(&mut self.particles, dt);

        // Push-out only moves predicted poses; velocities are already final.
        self.profiler.start(stages::PUSH_OUT);
        self.last_push_out = self.collisions.apply_push_out(&mut self.particles, &self.config, &self.dispatcher);
        self.profiler.end(stages::PUSH_OUT);
        self.timestepper.invoke(TimestepperStage::ConstraintsSolved, dt, &mut self.particles);

        self.reset_non_finite();
        PoseIntegration::commit(&mut self.particles);
        self.time += dt;

        self.profiler.start(stages::SLEEP);
        IslandSleeper::update(&mut self.particles, self.collisions.graph(), &self.config);
        self.profiler.end(stages::SLEEP);

        self.profiler.start(stages::EVENTS);
        self.events
            .gather_collisions(self.time, &self.particles, self.collisions.constraints(), &self.config);
        self.profiler.end(stages::EVENTS);
    }

    /// Runs kinematic callbacks, then turns pending targets into the velocity that reaches them in `dt`.
    fn update_kinematics(&mut self, dt: f32) {
        for binding in &mut self.proxies {
            binding.proxy.kinematic_update(&mut self.particles, &binding.owned, self.time);
        }
        for index in 0..self.particles.len() {
            if self.particles.kind[index] != BodyKind::Kinematic || self.particles.disabled[index] {
                continue;
            }
            if let Some(target) = self.particles.kinematic_target[index].take() {
                self.particles.v[index] = (target.position - self.particles.x[index]) / dt;
                self.particles.w[index] =
                    PoseIntegration::angular_velocity(self.particles.r[index], target.orientation, dt);
            }
        }
    }

    fn apply_forces(&mut self, dt: f32) {
        for binding in &mut self.proxies {
            binding.proxy.add_forces(&mut self.particles, &binding.owned, dt);
        }
        let gravity = self.config.gravity;
        for index in self.particles.awake_dynamic_indices().collect::<Vec<_>>() {
            let acceleration = gravity + self.particles.external_force[index] * self.particles.inv_m[index];
            self.particles.v[index] += acceleration * dt;
            let inv_inertia = self.particles.world_space_inv_inertia(index);
            self.particles.w[index] += inv_inertia * self.particles.external_torque[index] * dt;
        }
        self.particles.external_force.fill(Vec3::ZERO);
        self.particles.external_torque.fill(Vec3::ZERO);
    }

    /// Puts bodies with non-finite state back on their committed pose at rest. A body whose committed pose is
    /// itself broken is disabled.
    fn reset_non_finite(&mut self) {
        let particles = &mut self.particles;
        for index in 0..particles.len() {
            if particles.disabled[index] {
                continue;
            }
            let finite = particles.p[index].is_finite()
                && is_finite_quat(particles.q[index])
                && particles.v[index].is_finite()
                && particles.w[index].is_finite();
            if finite {
                continue;
            }
            tracing::error!(evolution = %self.id, particle = %particles.to_string(index), "non-finite body state");
            assert!(
                !self.config.strict_finite_checks,
                "non-finite state on particle {index} of {}",
                self.id
            );
            particles.v[index] = Vec3::ZERO;
            particles.w[index] = Vec3::ZERO;
            if particles.x[index].is_finite() && is_finite_quat(particles.r[index]) {
                particles.p[index] = particles.x[index];
                particles.q[index] = particles.r[index];
            } else {
                particles.disabled[index] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_properties::BodyVelocity;
    use crate::physics::collidables::plane::Plane;
    use crate::physics::collidables::shape::Shape;
    use crate::physics::collidables::sphere::Sphere;
    use crate::physics::solver_config::ShockPropagation;
    use crate::threading::proxy::{write_cache_lock, CacheLock, ProxyCallbacks, SyncTarget};
    use glam::Quat;
    use std::sync::Arc;

    fn config() -> SolverConfig {
        SolverConfig {
            gravity: Vec3::ZERO,
            parallel: false,
            strict_finite_checks: false,
            ..Default::default()
        }
    }

    fn sphere(position: Vec3) -> RigidBodyDescription {
        RigidBodyDescription::create_dynamic_no_velocity(
            RigidPose::from_position(position),
            Shape::Sphere(Sphere::new(1.0)),
            1.0,
        )
    }

    #[test]
    fn frame_is_split_into_substeps() {
        let mut evolution = Evolution::new(EvolutionId(0), config());
        evolution.advance_by(0.1);
        assert_eq!(evolution.last_frame_substeps(), 3);
        assert!((evolution.time() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn gravity_accelerates_free_bodies() {
        let mut evolution = Evolution::new(
            EvolutionId(0),
            SolverConfig {
                gravity: Vec3::new(0.0, 0.0, -10.0),
                ..config()
            },
        );
        let body = evolution.create_rigid_body(&sphere(Vec3::ZERO));
        evolution.advance_by(0.1);
        assert!((evolution.particles().v(body).z + 1.0).abs() < 1e-4);
        assert!(evolution.particles().x(body).z < 0.0);
    }

    #[test]
    fn kinematic_target_is_reached_in_one_substep() {
        let mut evolution = Evolution::new(EvolutionId(0), config());
        let platform = evolution.create_rigid_body(&RigidBodyDescription::create_kinematic(
            RigidPose::from_position(Vec3::ZERO),
            BodyVelocity::default(),
            Shape::Sphere(Sphere::new(0.5)),
        ));
        let target = RigidPose::new(Vec3::new(1.0, 0.0, 0.0), Quat::from_rotation_z(0.3));
        evolution.set_kinematic_target(platform, target).unwrap();
        evolution.advance_by(0.02);
        assert!(evolution.particles().x(platform).abs_diff_eq(target.position, 1e-4));
        assert!(evolution.particles().r(platform).abs_diff_eq(target.orientation, 1e-3));
    }

    #[test]
    fn non_finite_velocity_is_reset() {
        let mut evolution = Evolution::new(EvolutionId(0), config());
        let body = evolution.create_rigid_body(&sphere(Vec3::new(0.0, 0.0, 5.0)));
        evolution.particles_mut().v[body] = Vec3::new(f32::NAN, 0.0, 0.0);
        evolution.advance_by(1.0 / 60.0);
        assert_eq!(evolution.particles().x(body), Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(evolution.particles().v(body), Vec3::ZERO);
    }

    #[test]
    #[should_panic(expected = "non-finite state")]
    fn strict_checks_panic_on_non_finite_velocity() {
        let mut evolution = Evolution::new(
            EvolutionId(0),
            SolverConfig {
                strict_finite_checks: true,
                ..config()
            },
        );
        let body = evolution.create_rigid_body(&sphere(Vec3::ZERO));
        evolution.particles_mut().v[body] = Vec3::splat(f32::INFINITY);
        evolution.advance_by(1.0 / 60.0);
    }

    #[test]
    fn radial_force_pushes_nearby_bodies_only() {
        let mut evolution = Evolution::new(EvolutionId(0), config());
        let near = evolution.create_rigid_body(&sphere(Vec3::new(1.0, 0.0, 0.0)));
        let far = evolution.create_rigid_body(&sphere(Vec3::new(50.0, 0.0, 0.0)));
        assert_eq!(evolution.add_radial_force(Vec3::ZERO, 100.0, 10.0), 1);
        evolution.advance_by(0.01);
        assert!(evolution.particles().v(near).x > 0.0);
        assert_eq!(evolution.particles().v(far), Vec3::ZERO);
    }

    #[test]
    fn config_updates_are_sanitized() {
        let mut evolution = Evolution::new(EvolutionId(0), config());
        evolution.update_config(|config| {
            config.push_out_iterations = 0;
            config.shock_propagation = ShockPropagation::EveryIteration;
        });
        assert_eq!(evolution.config().push_out_iterations, 1);
        assert_eq!(evolution.config().shock_propagation, ShockPropagation::EveryIteration);
    }

    #[test]
    fn sleeping_body_is_woken_by_force() {
        let mut evolution = Evolution::new(EvolutionId(0), config());
        let body = evolution.create_rigid_body(&sphere(Vec3::ZERO));
        evolution.put_to_sleep(body).unwrap();
        assert!(evolution.particles().sleeping(body));
        evolution.add_force(body, Vec3::X).unwrap();
        assert!(!evolution.particles().sleeping(body));
        assert!(matches!(evolution.add_force(99, Vec3::X), Err(PhysicsError::InvalidParticle(99))));
    }

    #[derive(Default)]
    struct Dropper {
        created: bool,
        remapped: usize,
    }

    impl ProxyCallbacks for Dropper {
        type Results = Vec<Vec3>;

        fn create_rigid_bodies(&mut self, particles: &mut ParticleSet, owned: &mut Vec<usize>) {
            if !self.created {
                self.created = true;
                owned.push(particles.create_rigid_body(&sphere(Vec3::new(0.0, 0.0, 3.0))));
            }
        }

        fn remap_indices(&mut self, _remap: &IndexRemap) {
            self.remapped += 1;
        }

        fn cache_results(&mut self, particles: &ParticleSet, owned: &[usize], results: &mut Vec<Vec3>) {
            results.clear();
            results.extend(owned.iter().map(|&index| particles.x(index)));
        }
    }

    #[test]
    fn proxies_create_cache_and_survive_compaction() {
        let lock = Arc::new(CacheLock::new(()));
        let mut evolution = Evolution::new(EvolutionId(4), config());
        let doomed = evolution.create_rigid_body(&sphere(Vec3::new(20.0, 0.0, 0.0)));
        let (binding, mut handle) = ProxyBinding::new(
            ProxyId(1),
            crate::physics::handles::EvolutionHandle { id: EvolutionId(4) },
            Dropper::default(),
            lock.clone(),
        );
        evolution.add_proxy(binding);
        evolution.advance_by(1.0 / 60.0);
        assert_eq!(evolution.proxies()[0].owned(), &[1]);

        evolution.retire_body(doomed).unwrap();
        let remap = evolution.compact();
        assert_eq!(remap.get(1), Some(0));
        assert_eq!(evolution.proxies()[0].owned(), &[0]);

        evolution.cache_results();
        evolution.flip_caches(&write_cache_lock(&lock));
        handle.sync_to_cache();
        assert_eq!(handle.results(), &vec![Vec3::new(0.0, 0.0, 3.0)]);

        assert!(evolution.remove_proxy(ProxyId(1)));
        assert!(!evolution.remove_proxy(ProxyId(1)));
        assert!(handle.is_destroyed());
        assert!(evolution.particles().retired(0));
    }

    #[test]
    fn resting_sphere_produces_collision_events() {
        let mut evolution = Evolution::new(
            EvolutionId(0),
            SolverConfig {
                gravity: Vec3::new(0.0, 0.0, -10.0),
                ..config()
            },
        );
        evolution.create_rigid_body(&RigidBodyDescription::create_static(
            RigidPose::default(),
            Shape::Plane(Plane::new(Vec3::ZERO, Vec3::Z)),
        ));
        let ball = evolution.create_rigid_body(
            &sphere(Vec3::new(0.0, 0.0, 1.01)).with_velocity(BodyVelocity::from_linear(Vec3::new(0.0, 0.0, -3.0))),
        );
        evolution.advance_by(1.0 / 30.0);
        assert!(evolution.particles().collided(ball));
        assert!(evolution.collision_events().iter().any(|event| event.particle_index == ball));
    }
}
