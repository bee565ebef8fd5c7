use std::sync::Arc;

use glam::{Mat3, Quat, Vec3};

use crate::error::PhysicsError;
use crate::physics::body_description::{BodyKind, RigidBodyDescription};
use crate::physics::body_properties::{BodyVelocity, RigidPose};
use crate::physics::collidables::collision_particles::CollisionParticles;
use crate::physics::collidables::shape::Shape;
use crate::physics::handles::IndexRemap;
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::math_helper::rotate_tensor;

/// Mutable per-body state touched by the constraint solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub p: Vec3,
    pub q: Quat,
    pub v: Vec3,
    pub w: Vec3,
}

/// Columnar store of rigid body state.
///
/// `x`/`r` hold the committed pose at the start of a sub-step; `p`/`q` hold the predicted pose the
/// position based solver works on. Indices are stable: removing a body retires its row, and rows are only
/// reclaimed by an explicit `compact`, which reports the index remapping.
#[derive(Debug, Default, Clone)]
pub struct ParticleSet {
    pub(crate) x: Vec<Vec3>,
    pub(crate) r: Vec<Quat>,
    pub(crate) p: Vec<Vec3>,
    pub(crate) q: Vec<Quat>,
    pub(crate) v: Vec<Vec3>,
    pub(crate) w: Vec<Vec3>,
    pub(crate) m: Vec<f32>,
    pub(crate) inv_m: Vec<f32>,
    pub(crate) i: Vec<Mat3>,
    pub(crate) inv_i: Vec<Mat3>,
    pub(crate) kind: Vec<BodyKind>,
    pub(crate) geometry: Vec<Option<Arc<Shape>>>,
    pub(crate) collision_particles: Vec<Option<Arc<CollisionParticles>>>,
    pub(crate) island: Vec<i32>,
    pub(crate) disabled: Vec<bool>,
    pub(crate) sleeping: Vec<bool>,
    pub(crate) retired: Vec<bool>,
    pub(crate) collided: Vec<bool>,
    pub(crate) sleep_counter: Vec<u32>,
    pub(crate) kinematic_target: Vec<Option<RigidPose>>,
    pub(crate) external_force: Vec<Vec3>,
    pub(crate) external_torque: Vec<Vec3>,
}

fn retain_by<T>(column: &mut Vec<T>, keep: &[bool]) {
    let mut index = 0;
    column.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}

impl ParticleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a body and returns its index.
    pub fn create_rigid_body(&mut self, description: &RigidBodyDescription) -> usize {
        let index = self.x.len();
        let pose = description.pose;
        let dynamic = description.kind == BodyKind::Dynamic && !description.inertia.is_infinite();
        let kind = if description.kind == BodyKind::Dynamic && !dynamic {
            tracing::warn!(index, "dynamic body described with infinite inertia, treating it as static");
            BodyKind::Static
        } else {
            description.kind
        };

        self.x.push(pose.position);
        self.r.push(pose.orientation);
        self.p.push(pose.position);
        self.q.push(pose.orientation);
        self.v.push(description.velocity.linear);
        self.w.push(description.velocity.angular);
        if dynamic {
            self.m.push(description.inertia.mass);
            self.inv_m.push(description.inertia.inverse_mass);
            self.i.push(description.inertia.local_inertia);
            self.inv_i.push(description.inertia.local_inverse_inertia);
        } else {
            self.m.push(0.0);
            self.inv_m.push(0.0);
            self.i.push(Mat3::ZERO);
            self.inv_i.push(Mat3::ZERO);
        }
        self.kind.push(kind);

        let samples = match (&description.collision_particles, &description.shape) {
            (Some(points), _) => points.clone(),
            (None, Some(shape)) => shape.compute_sample_points(),
            (None, None) => Vec::new(),
        };
        self.collision_particles
            .push((!samples.is_empty()).then(|| Arc::new(CollisionParticles::new(samples))));
        self.geometry.push(description.shape.clone());
        self.island.push(-1);
        self.disabled.push(false);
        self.sleeping.push(false);
        self.retired.push(false);
        self.collided.push(false);
        self.sleep_counter.push(0);
        self.kinematic_target.push(None);
        self.external_force.push(Vec3::ZERO);
        self.external_torque.push(Vec3::ZERO);
        index
    }

    /// Number of rows, including retired ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    fn check(&self, index: usize) -> Result<(), PhysicsError> {
        if index >= self.len() || self.retired[index] {
            Err(PhysicsError::InvalidParticle(index))
        } else {
            Ok(())
        }
    }

    /// Disables the body and marks its row for removal at the next compaction. The index is not reused before then.
    pub fn retire(&mut self, index: usize) -> Result<(), PhysicsError> {
        self.check(index)?;
        self.retired[index] = true;
        self.disabled[index] = true;
        self.v[index] = Vec3::ZERO;
        self.w[index] = Vec3::ZERO;
        Ok(())
    }

    /// Removes retired rows. Every index held outside the set must be rewritten with the returned remap.
    pub fn compact(&mut self) -> IndexRemap {
        let keep: Vec<bool> = self.retired.iter().map(|retired| !retired).collect();
        let mut next = 0;
        let old_to_new = keep
            .iter()
            .map(|kept| {
                kept.then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();

        retain_by(&mut self.x, &keep);
        retain_by(&mut self.r, &keep);
        retain_by(&mut self.p, &keep);
        retain_by(&mut self.q, &keep);
        retain_by(&mut self.v, &keep);
        retain_by(&mut self.w, &keep);
        retain_by(&mut self.m, &keep);
        retain_by(&mut self.inv_m, &keep);
        retain_by(&mut self.i, &keep);
        retain_by(&mut self.inv_i, &keep);
        retain_by(&mut self.kind, &keep);
        retain_by(&mut self.geometry, &keep);
        retain_by(&mut self.collision_particles, &keep);
        retain_by(&mut self.island, &keep);
        retain_by(&mut self.disabled, &keep);
        retain_by(&mut self.sleeping, &keep);
        retain_by(&mut self.retired, &keep);
        retain_by(&mut self.collided, &keep);
        retain_by(&mut self.sleep_counter, &keep);
        retain_by(&mut self.kinematic_target, &keep);
        retain_by(&mut self.external_force, &keep);
        retain_by(&mut self.external_torque, &keep);
        IndexRemap { old_to_new }
    }

    /// Rows that are neither disabled nor retired.
    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(|&index| !self.disabled[index] && !self.retired[index])
    }

    /// Dynamic bodies that are enabled and awake.
    pub fn awake_dynamic_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.active_indices()
            .filter(|&index| self.inv_m[index] != 0.0 && !self.sleeping[index])
    }

    #[inline]
    pub fn x(&self, index: usize) -> Vec3 {
        self.x[index]
    }

    #[inline]
    pub fn r(&self, index: usize) -> Quat {
        self.r[index]
    }

    #[inline]
    pub fn p(&self, index: usize) -> Vec3 {
        self.p[index]
    }

    #[inline]
    pub fn q(&self, index: usize) -> Quat {
        self.q[index]
    }

    #[inline]
    pub fn v(&self, index: usize) -> Vec3 {
        self.v[index]
    }

    #[inline]
    pub fn w(&self, index: usize) -> Vec3 {
        self.w[index]
    }

    #[inline]
    pub fn m(&self, index: usize) -> f32 {
        self.m[index]
    }

    #[inline]
    pub fn inv_m(&self, index: usize) -> f32 {
        self.inv_m[index]
    }

    #[inline]
    pub fn kind(&self, index: usize) -> BodyKind {
        self.kind[index]
    }

    /// True for bodies that respond to impulses.
    #[inline]
    pub fn is_dynamic(&self, index: usize) -> bool {
        self.inv_m[index] != 0.0
    }

    #[inline]
    pub fn geometry(&self, index: usize) -> Option<&Arc<Shape>> {
        self.geometry[index].as_ref()
    }

    #[inline]
    pub fn collision_particles(&self, index: usize) -> Option<&Arc<CollisionParticles>> {
        self.collision_particles[index].as_ref()
    }

    #[inline]
    pub fn island(&self, index: usize) -> i32 {
        self.island[index]
    }

    #[inline]
    pub fn disabled(&self, index: usize) -> bool {
        self.disabled[index]
    }

    #[inline]
    pub fn sleeping(&self, index: usize) -> bool {
        self.sleeping[index]
    }

    #[inline]
    pub fn retired(&self, index: usize) -> bool {
        self.retired[index]
    }

    /// True if a contact on this body was resolved during the last sub-step.
    #[inline]
    pub fn collided(&self, index: usize) -> bool {
        self.collided[index]
    }

    /// Committed pose.
    #[inline]
    pub fn pose(&self, index: usize) -> RigidPose {
        RigidPose::new(self.x[index], self.r[index])
    }

    /// Predicted pose used by collision detection.
    #[inline]
    pub fn predicted_transform(&self, index: usize) -> RigidPose {
        RigidPose::new(self.p[index], self.q[index])
    }

    #[inline]
    pub fn velocity(&self, index: usize) -> BodyVelocity {
        BodyVelocity::new(self.v[index], self.w[index])
    }

    pub fn set_velocity(&mut self, index: usize, velocity: BodyVelocity) -> Result<(), PhysicsError> {
        self.check(index)?;
        if self.inv_m[index] == 0.0 && self.kind[index] == BodyKind::Static {
            return Ok(());
        }
        self.v[index] = velocity.linear;
        self.w[index] = velocity.angular;
        Ok(())
    }

    pub fn set_disabled(&mut self, index: usize, disabled: bool) -> Result<(), PhysicsError> {
        self.check(index)?;
        self.disabled[index] = disabled;
        Ok(())
    }

    pub fn set_sleeping(&mut self, index: usize, sleeping: bool) -> Result<(), PhysicsError> {
        self.check(index)?;
        if self.inv_m[index] == 0.0 {
            return Ok(());
        }
        self.sleeping[index] = sleeping;
        self.sleep_counter[index] = 0;
        if sleeping {
            self.v[index] = Vec3::ZERO;
            self.w[index] = Vec3::ZERO;
        }
        Ok(())
    }

    /// Sets the pose a kinematic body moves to during the next sub-step.
    pub fn set_kinematic_target(&mut self, index: usize, target: RigidPose) -> Result<(), PhysicsError> {
        self.check(index)?;
        if self.kind[index] != BodyKind::Kinematic {
            tracing::warn!(index, "kinematic target set on a non-kinematic body, ignoring");
            return Ok(());
        }
        self.kinematic_target[index] = Some(target);
        Ok(())
    }

    /// Accumulates a world-space force applied over the next sub-step.
    pub fn add_force(&mut self, index: usize, force: Vec3) -> Result<(), PhysicsError> {
        self.check(index)?;
        self.external_force[index] += force;
        Ok(())
    }

    /// Accumulates a world-space torque applied over the next sub-step.
    pub fn add_torque(&mut self, index: usize, torque: Vec3) -> Result<(), PhysicsError> {
        self.check(index)?;
        self.external_torque[index] += torque;
        Ok(())
    }

    /// Inverse inertia rotated by the predicted orientation.
    #[inline]
    pub fn world_space_inv_inertia(&self, index: usize) -> Mat3 {
        rotate_tensor(self.q[index], &self.inv_i[index])
    }

    /// Inertia rotated by the predicted orientation.
    #[inline]
    pub fn world_space_inertia(&self, index: usize) -> Mat3 {
        rotate_tensor(self.q[index], &self.i[index])
    }

    /// Kinetic energy of a body using its current velocity and predicted orientation.
    pub fn kinetic_energy(&self, index: usize) -> f32 {
        let w = self.w[index];
        0.5 * self.m[index] * self.v[index].length_squared() + 0.5 * w.dot(self.world_space_inertia(index) * w)
    }

    /// World-space bounds at the predicted pose, or `None` for unbounded or shapeless bodies.
    pub fn world_space_bounding_box(&self, index: usize) -> Option<BoundingBox> {
        let local = self.geometry[index].as_ref()?.bounding_box()?;
        Some(local.transformed(&self.predicted_transform(index)))
    }

    #[inline]
    pub(crate) fn state(&self, index: usize) -> BodyState {
        BodyState {
            p: self.p[index],
            q: self.q[index],
            v: self.v[index],
            w: self.w[index],
        }
    }

    #[inline]
    pub(crate) fn write_state(&mut self, index: usize, state: BodyState) {
        self.p[index] = state.p;
        self.q[index] = state.q;
        self.v[index] = state.v;
        self.w[index] = state.w;
    }

    pub fn to_string(&self, index: usize) -> String {
        format!(
            "Particle<{index}> x: {}, p: {}, v: {}, w: {}, inv_m: {}, island: {}",
            self.x[index], self.p[index], self.v[index], self.w[index], self.inv_m[index], self.island[index]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::plane::Plane;
    use crate::physics::collidables::sphere::Sphere;

    fn sphere_at(z: f32) -> RigidBodyDescription {
        RigidBodyDescription::create_dynamic_no_velocity(
            RigidPose::from_position(Vec3::new(0.0, 0.0, z)),
            Shape::Sphere(Sphere::new(1.0)),
            1.0,
        )
    }

    #[test]
    fn static_bodies_have_zero_inverse_mass() {
        let mut particles = ParticleSet::new();
        let ground = particles.create_rigid_body(&RigidBodyDescription::create_static(
            RigidPose::IDENTITY,
            Shape::Plane(Plane::ground()),
        ));
        let ball = particles.create_rigid_body(&sphere_at(2.0));
        assert_eq!(particles.inv_m(ground), 0.0);
        assert!(!particles.is_dynamic(ground));
        assert!(particles.is_dynamic(ball));
        assert!(particles.collision_particles(ground).is_none());
        assert!(particles.collision_particles(ball).is_some());
    }

    #[test]
    fn retired_indices_are_not_reused_until_compaction() {
        let mut particles = ParticleSet::new();
        let a = particles.create_rigid_body(&sphere_at(0.0));
        let b = particles.create_rigid_body(&sphere_at(3.0));
        particles.retire(a).unwrap();
        let c = particles.create_rigid_body(&sphere_at(6.0));
        assert_eq!(c, 2);
        assert!(particles.retire(a).is_err());

        let remap = particles.compact();
        assert_eq!(remap.get(a), None);
        assert_eq!(remap.get(b), Some(0));
        assert_eq!(remap.get(c), Some(1));
        assert_eq!(particles.len(), 2);
        assert_eq!(particles.x(1).z, 6.0);
    }

    #[test]
    fn kinematic_target_only_applies_to_kinematic_bodies() {
        let mut particles = ParticleSet::new();
        let ball = particles.create_rigid_body(&sphere_at(0.0));
        particles
            .set_kinematic_target(ball, RigidPose::from_position(Vec3::ONE))
            .unwrap();
        assert!(particles.kinematic_target[ball].is_none());
    }

    #[test]
    fn kinetic_energy_includes_rotation() {
        let mut particles = ParticleSet::new();
        let ball = particles.create_rigid_body(&sphere_at(0.0));
        particles
            .set_velocity(ball, BodyVelocity::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)))
            .unwrap();
        // 0.5 * 1 * 4 + 0.5 * 0.4
        assert!((particles.kinetic_energy(ball) - 2.2).abs() < 1e-5);
    }
}
