use glam::{Quat, Vec3};

use crate::physics::body_description::BodyKind;
use crate::physics::body_properties::{BodyVelocity, RigidPose};
use crate::physics::particles::ParticleSet;
use crate::utilities::math_helper::angular_velocity_between;

/// Helper functions for integrating body poses.
pub struct PoseIntegration;

impl PoseIntegration {
    /// Integrates a position by linear velocity over dt.
    #[inline(always)]
    pub fn integrate_position(position: Vec3, linear_velocity: Vec3, dt: f32) -> Vec3 {
        position + linear_velocity * dt
    }

    /// Integrates an orientation by angular velocity over dt.
    #[inline(always)]
    pub fn integrate_orientation(orientation: Quat, angular_velocity: Vec3, dt: f32) -> Quat {
        // All orientation integration assumes a series of piecewise linear integrations. No gyroscopic term.
        let speed = angular_velocity.length();
        if speed > 1e-15 {
            let half_angle = speed * dt * 0.5;
            let scale = half_angle.sin() / speed;
            let q = Quat::from_xyzw(
                angular_velocity.x * scale,
                angular_velocity.y * scale,
                angular_velocity.z * scale,
                half_angle.cos(),
            );
            (q * orientation).normalize()
        } else {
            orientation
        }
    }

    /// Integrates a rigid pose by body velocity over dt.
    #[inline(always)]
    pub fn integrate_pose(pose: &RigidPose, velocity: &BodyVelocity, dt: f32) -> RigidPose {
        RigidPose::new(
            Self::integrate_position(pose.position, velocity.linear, dt),
            Self::integrate_orientation(pose.orientation, velocity.angular, dt),
        )
    }

    /// Applies an impulse-free positional rotation `delta` (world-space angular displacement) to an orientation.
    #[inline(always)]
    pub fn apply_rotation_delta(orientation: Quat, delta: Vec3) -> Quat {
        (Quat::from_scaled_axis(delta) * orientation).normalize()
    }

    /// Predicts `p`/`q` from the committed pose for every awake dynamic body and every kinematic body.
    pub fn predict(particles: &mut ParticleSet, dt: f32) {
        for index in 0..particles.len() {
            let moves = match particles.kind[index] {
                BodyKind::Kinematic => true,
                BodyKind::Dynamic => particles.inv_m[index] != 0.0 && !particles.sleeping[index],
                BodyKind::Static => false,
            };
            if particles.disabled[index] || !moves {
                particles.p[index] = particles.x[index];
                particles.q[index] = particles.r[index];
                continue;
            }
            particles.p[index] = Self::integrate_position(particles.x[index], particles.v[index], dt);
            particles.q[index] = Self::integrate_orientation(particles.r[index], particles.w[index], dt);
        }
    }

    /// Derives velocities from the solved positional change, the PBD velocity update.
    pub fn update_velocities(particles: &mut ParticleSet, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let inv_dt = 1.0 / dt;
        for index in 0..particles.len() {
            if particles.disabled[index] || particles.inv_m[index] == 0.0 || particles.sleeping[index] {
                continue;
            }
            particles.v[index] = (particles.p[index] - particles.x[index]) * inv_dt;
            particles.w[index] = Self::angular_velocity(particles.r[index], particles.q[index], dt);
        }
    }

    /// Angular velocity that rotates `from` into `to` over `dt`.
    #[inline]
    pub fn angular_velocity(from: Quat, to: Quat, dt: f32) -> Vec3 {
        angular_velocity_between(from, to, dt)
    }

    /// Commits the predicted pose.
    pub fn commit(particles: &mut ParticleSet) {
        for index in 0..particles.len() {
            if particles.disabled[index] {
                continue;
            }
            particles.x[index] = particles.p[index];
            particles.r[index] = particles.q[index];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn orientation_integration_matches_axis_angle() {
        let integrated = PoseIntegration::integrate_orientation(Quat::IDENTITY, Vec3::new(0.0, 0.0, FRAC_PI_2), 1.0);
        let expected = Quat::from_rotation_z(FRAC_PI_2);
        assert!(integrated.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn zero_angular_velocity_keeps_orientation() {
        let q = Quat::from_rotation_x(0.3);
        assert_eq!(PoseIntegration::integrate_orientation(q, Vec3::ZERO, 0.1), q);
    }

    #[test]
    fn angular_velocity_inverts_integration() {
        let start = Quat::from_rotation_y(0.2);
        let w = Vec3::new(0.5, -1.0, 2.0);
        let end = PoseIntegration::integrate_orientation(start, w, 1.0 / 60.0);
        let recovered = PoseIntegration::angular_velocity(start, end, 1.0 / 60.0);
        assert!(recovered.abs_diff_eq(w, 1e-2));
    }
}
