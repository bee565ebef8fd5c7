use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a rigid transformation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidPose {
    /// Orientation of the pose.
    pub orientation: Quat,
    /// Position of the pose.
    pub position: Vec3,
}

impl Default for RigidPose {
    #[inline(always)]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidPose {
    /// Returns a pose with a position at (0,0,0) and identity orientation.
    pub const IDENTITY: Self = Self {
        orientation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };

    /// Creates a rigid pose with the given position and orientation.
    #[inline(always)]
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Creates a rigid pose with the given position and identity orientation.
    #[inline(always)]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    /// Transforms a point by the rigid pose: rotate then translate.
    #[inline(always)]
    pub fn transform_point(&self, v: Vec3) -> Vec3 {
        self.orientation * v + self.position
    }

    /// Rotates a direction by the pose.
    #[inline(always)]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.orientation * v
    }

    /// Transforms a point by the inverse of a rigid pose: (v - position) * orientation^-1.
    #[inline(always)]
    pub fn inverse_transform_point(&self, v: Vec3) -> Vec3 {
        self.orientation.conjugate() * (v - self.position)
    }

    #[inline(always)]
    pub fn inverse_transform_vector(&self, v: Vec3) -> Vec3 {
        self.orientation.conjugate() * v
    }

    /// Inverts the rigid transformation of the pose.
    #[inline(always)]
    pub fn inverse(&self) -> Self {
        let orientation = self.orientation.conjugate();
        Self {
            orientation,
            position: orientation * -self.position,
        }
    }

    /// Concatenates one rigid transform with another. The resulting transform is equivalent
    /// to performing `self` followed by `then`.
    #[inline(always)]
    pub fn then(&self, then: &RigidPose) -> Self {
        Self {
            orientation: (then.orientation * self.orientation).normalize(),
            position: then.orientation * self.position + then.position,
        }
    }

    /// Expresses this pose in the local space of `other`.
    ///
    /// The result maps points from this pose's local space into `other`'s local space.
    #[inline(always)]
    pub fn relative_to(&self, other: &RigidPose) -> Self {
        self.then(&other.inverse())
    }
}

impl From<Vec3> for RigidPose {
    fn from(position: Vec3) -> Self {
        Self::from_position(position)
    }
}

impl From<(Vec3, Quat)> for RigidPose {
    fn from((position, orientation): (Vec3, Quat)) -> Self {
        Self::new(position, orientation)
    }
}

impl fmt::Display for RigidPose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}, {}", self.position, self.orientation)
    }
}

/// Linear and angular velocity of a body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyVelocity {
    /// Linear velocity associated with the body.
    pub linear: Vec3,
    /// Angular velocity associated with the body.
    pub angular: Vec3,
}

impl BodyVelocity {
    #[inline(always)]
    pub fn new(linear: Vec3, angular: Vec3) -> Self {
        Self { linear, angular }
    }

    #[inline(always)]
    pub fn from_linear(linear: Vec3) -> Self {
        Self {
            linear,
            angular: Vec3::ZERO,
        }
    }
}

impl fmt::Display for BodyVelocity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Linear: {}, Angular: {}", self.linear, self.angular)
    }
}

/// Mass properties of a body in its local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyInertia {
    pub mass: f32,
    /// Zero for static and kinematic bodies.
    pub inverse_mass: f32,
    pub local_inertia: Mat3,
    pub local_inverse_inertia: Mat3,
}

impl Default for BodyInertia {
    fn default() -> Self {
        Self::INFINITE
    }
}

impl BodyInertia {
    /// Inertia of a body that never responds to impulses.
    pub const INFINITE: Self = Self {
        mass: 0.0,
        inverse_mass: 0.0,
        local_inertia: Mat3::ZERO,
        local_inverse_inertia: Mat3::ZERO,
    };

    /// Builds dynamic inertia from a positive mass and a local inertia tensor.
    pub fn from_mass(mass: f32, local_inertia: Mat3) -> Self {
        debug_assert!(mass > 0.0, "Dynamic bodies need a positive mass.");
        let determinant = local_inertia.determinant();
        let local_inverse_inertia = if determinant.abs() > f32::MIN_POSITIVE {
            local_inertia.inverse()
        } else {
            Mat3::ZERO
        };
        Self {
            mass,
            inverse_mass: 1.0 / mass,
            local_inertia,
            local_inverse_inertia,
        }
    }

    #[inline(always)]
    pub fn is_infinite(&self) -> bool {
        self.inverse_mass == 0.0
    }
}
