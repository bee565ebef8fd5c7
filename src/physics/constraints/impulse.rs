use glam::{Mat3, Vec3};

use crate::utilities::math_helper::{skew_symmetric, SMALL_NUMBER};

/// One side of a contact as seen by the impulse math.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactBody {
    pub v: Vec3,
    pub w: Vec3,
    pub m: f32,
    pub inv_m: f32,
    /// World space inverse inertia.
    pub inv_i: Mat3,
    /// Offset from the body's center of mass to the contact point.
    pub r: Vec3,
}

impl ContactBody {
    #[inline(always)]
    pub fn is_dynamic(&self) -> bool {
        self.inv_m != 0.0
    }

    /// Velocity of the material point at the contact.
    #[inline(always)]
    pub fn point_velocity(&self) -> Vec3 {
        self.v + self.w.cross(self.r)
    }

    /// Contribution of this body to the contact's factor matrix. Zero for immovable bodies.
    #[inline]
    pub fn factor_matrix(&self) -> Mat3 {
        if self.is_dynamic() {
            compute_factor_matrix(self.r, &self.inv_i, self.inv_m)
        } else {
            Mat3::ZERO
        }
    }

    /// Kinetic energy of the body.
    #[inline]
    pub fn kinetic_energy(&self, world_inertia: &Mat3) -> f32 {
        0.5 * self.m * self.v.length_squared() + 0.5 * self.w.dot(*world_inertia * self.w)
    }
}

/// Maps an impulse at offset `r` to the velocity change of that point: `inv_m * I - [r] * inv_i * [r]`.
#[inline]
pub fn compute_factor_matrix(r: Vec3, inv_i: &Mat3, inv_m: f32) -> Mat3 {
    let cross = skew_symmetric(r);
    Mat3::from_diagonal(Vec3::splat(inv_m)) - cross * *inv_i * cross
}

/// Inverts a factor matrix, or returns `None` if it is singular.
#[inline]
pub fn inverse_factor(factor: &Mat3) -> Option<Mat3> {
    let determinant = factor.determinant();
    (determinant.is_finite() && determinant.abs() > SMALL_NUMBER).then(|| factor.inverse())
}

/// Scales `impulse` down so that applying it (`+impulse` to `body0`, `-impulse` to `body1`) cannot raise the
/// pair's kinetic energy. An impulse that would only add energy is dropped entirely.
pub fn energy_clamped_impulse(body0: &ContactBody, body1: &ContactBody, impulse: Vec3) -> Vec3 {
    // Immovable bodies contribute the velocity of their contact point as a reference frame.
    let kinematic_velocity = if !body0.is_dynamic() {
        body0.point_velocity()
    } else if !body1.is_dynamic() {
        body1.point_velocity()
    } else {
        Vec3::ZERO
    };
    let impulse_size = impulse.length_squared();

    let mut numerator0 = 0.0;
    let mut denominator0 = 0.0;
    if body0.is_dynamic() {
        let jr = body0.r.cross(impulse);
        numerator0 = impulse.dot(body0.v - kinematic_velocity) + jr.dot(body0.w);
        denominator0 = impulse_size * body0.inv_m + jr.dot(body0.inv_i * jr);
    }
    let mut numerator1 = 0.0;
    let mut denominator1 = 0.0;
    if body1.is_dynamic() {
        let jr = body1.r.cross(impulse);
        numerator1 = impulse.dot(body1.v - kinematic_velocity) + jr.dot(body1.w);
        denominator1 = impulse_size * body1.inv_m + jr.dot(body1.inv_i * jr);
    }

    let numerator = -2.0 * (numerator0 - numerator1);
    if numerator < 0.0 {
        return Vec3::ZERO;
    }
    let denominator = denominator0 + denominator1;
    if numerator < denominator {
        impulse * (numerator / denominator)
    } else {
        impulse
    }
}
