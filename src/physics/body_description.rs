use std::sync::Arc;

use glam::{Mat3, Vec3};

use crate::physics::body_properties::{BodyInertia, BodyVelocity, RigidPose};
use crate::physics::collidables::shape::Shape;

/// How a body participates in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// Integrated by forces and moved by constraints.
    Dynamic,
    /// Moved only by its kinematic target; never receives impulses.
    Kinematic,
    /// Never moves.
    Static,
}

/// Describes a body's initial state.
#[derive(Debug, Clone)]
pub struct RigidBodyDescription {
    /// Position and orientation of the body.
    pub pose: RigidPose,
    /// Linear and angular velocity of the body.
    pub velocity: BodyVelocity,
    /// Mass and inertia tensor of the body. Ignored for non-dynamic bodies.
    pub inertia: BodyInertia,
    pub kind: BodyKind,
    pub shape: Option<Arc<Shape>>,
    /// Local-space sample points used by sampled collision tests. Generated from the shape when absent.
    pub collision_particles: Option<Vec<Vec3>>,
}

impl RigidBodyDescription {
    /// Creates a dynamic body description. Inertia is computed from the shape.
    pub fn create_dynamic(pose: RigidPose, velocity: BodyVelocity, shape: Shape, mass: f32) -> Self {
        let local_inertia = shape.compute_inertia(mass);
        Self {
            pose,
            velocity,
            inertia: BodyInertia::from_mass(mass, local_inertia),
            kind: BodyKind::Dynamic,
            shape: Some(Arc::new(shape)),
            collision_particles: None,
        }
    }

    /// Creates a dynamic body description with zero initial velocity.
    pub fn create_dynamic_no_velocity(pose: RigidPose, shape: Shape, mass: f32) -> Self {
        Self::create_dynamic(pose, BodyVelocity::default(), shape, mass)
    }

    /// Creates a dynamic body with an explicit local inertia tensor.
    pub fn create_dynamic_with_inertia(pose: RigidPose, shape: Shape, mass: f32, local_inertia: Mat3) -> Self {
        Self {
            inertia: BodyInertia::from_mass(mass, local_inertia),
            ..Self::create_dynamic_no_velocity(pose, shape, mass)
        }
    }

    /// Creates a kinematic body description.
    pub fn create_kinematic(pose: RigidPose, velocity: BodyVelocity, shape: Shape) -> Self {
        Self {
            pose,
            velocity,
            inertia: BodyInertia::INFINITE,
            kind: BodyKind::Kinematic,
            shape: Some(Arc::new(shape)),
            collision_particles: None,
        }
    }

    /// Creates a static body description.
    pub fn create_static(pose: RigidPose, shape: Shape) -> Self {
        Self {
            pose,
            velocity: BodyVelocity::default(),
            inertia: BodyInertia::INFINITE,
            kind: BodyKind::Static,
            shape: Some(Arc::new(shape)),
            collision_particles: None,
        }
    }

    pub fn with_collision_particles(mut self, points: Vec<Vec3>) -> Self {
        self.collision_particles = Some(points);
        self
    }

    pub fn with_velocity(mut self, velocity: BodyVelocity) -> Self {
        self.velocity = velocity;
        self
    }
}
