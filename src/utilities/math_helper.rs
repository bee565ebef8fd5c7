use glam::{Mat3, Quat, Vec3};

/// Values below this are treated as zero when testing penetration samples.
pub const KINDA_SMALL_NUMBER: f32 = 1.0e-4;
/// Values below this are treated as zero in denominators and lengths.
pub const SMALL_NUMBER: f32 = 1.0e-8;

/// Clamps a value between a minimum and maximum value.
#[inline(always)]
pub fn clamp<T: PartialOrd>(value: T, min: T, max: T) -> T {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Returns -1 if the value is negative and 1 otherwise.
#[inline(always)]
pub fn binary_sign(x: f32) -> f32 {
    if x < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Returns -1, 0 or 1.
#[inline(always)]
pub fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Builds the matrix `S` such that `S * x == v.cross(x)`.
#[inline]
pub fn skew_symmetric(v: Vec3) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(0.0, v.z, -v.y),
        Vec3::new(-v.z, 0.0, v.x),
        Vec3::new(v.y, -v.x, 0.0),
    )
}

/// Normalizes `v`, returning zero for vectors too short to normalize.
#[inline]
pub fn safe_normal(v: Vec3) -> Vec3 {
    let length_squared = v.length_squared();
    if length_squared > SMALL_NUMBER {
        v / length_squared.sqrt()
    } else {
        Vec3::ZERO
    }
}

/// Rotates a local-space tensor into world space: `R * T * R^T`.
#[inline]
pub fn rotate_tensor(orientation: Quat, local_tensor: &Mat3) -> Mat3 {
    let rotation = Mat3::from_quat(orientation);
    rotation * *local_tensor * rotation.transpose()
}

/// Angular velocity that rotates `from` into `to` over `dt`.
pub fn angular_velocity_between(from: Quat, to: Quat, dt: f32) -> Vec3 {
    let mut delta = to * from.conjugate();
    // Take the short way around.
    if delta.w < 0.0 {
        delta = -delta;
    }
    delta.to_scaled_axis() / dt
}

#[inline]
pub fn is_finite_quat(q: Quat) -> bool {
    q.x.is_finite() && q.y.is_finite() && q.z.is_finite() && q.w.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skew_matches_cross_product() {
        let a = Vec3::new(1.0, -2.0, 3.0);
        let b = Vec3::new(-4.0, 0.5, 2.0);
        let expected = a.cross(b);
        let actual = skew_symmetric(a) * b;
        assert!((expected - actual).length() < 1e-6);
    }

    #[test]
    fn safe_normal_of_zero_is_zero() {
        assert_eq!(safe_normal(Vec3::ZERO), Vec3::ZERO);
        assert!((safe_normal(Vec3::new(0.0, 3.0, 0.0)) - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn angular_velocity_round_trips_small_rotation() {
        let from = Quat::IDENTITY;
        let to = Quat::from_rotation_z(0.1);
        let w = angular_velocity_between(from, to, 0.5);
        assert!((w - Vec3::new(0.0, 0.0, 0.2)).length() < 1e-5);
    }

    #[test]
    fn clamp_and_sign() {
        assert_eq!(clamp(5, 0, 3), 3);
        assert_eq!(clamp(-1.0, 0.0, 3.0), 0.0);
        assert_eq!(binary_sign(0.0), 1.0);
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-2.0), -1.0);
    }
}
