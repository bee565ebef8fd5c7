use glam::Vec3;
use std::fmt;

/// A contact between two bodies, rebuilt every sub-step.
///
/// The normal points from the levelset body toward the particle body. `phi` is the signed separation along
/// the normal; negative values are penetration. `location` is a world-space point on the contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactConstraint {
    pub particle_index: usize,
    pub levelset_index: usize,
    pub location: Vec3,
    pub normal: Vec3,
    pub phi: f32,
    /// Sum of impulses applied by the velocity solve.
    pub accumulated_impulse: Vec3,
}

impl ContactConstraint {
    /// Creates an unresolved constraint. `phi` starts at `thickness` so any deeper sample replaces it.
    #[inline]
    pub fn new(particle_index: usize, levelset_index: usize, thickness: f32) -> Self {
        Self {
            particle_index,
            levelset_index,
            location: Vec3::ZERO,
            normal: Vec3::Z,
            phi: thickness,
            accumulated_impulse: Vec3::ZERO,
        }
    }

    /// Resets the geometric part before a fresh narrow phase update.
    #[inline]
    pub fn reset(&mut self, thickness: f32) {
        self.phi = thickness;
    }

    /// True if `index` is one of the two bodies.
    #[inline]
    pub fn involves(&self, index: usize) -> bool {
        self.particle_index == index || self.levelset_index == index
    }

    /// Replaces the geometry if `phi` is deeper. Returns whether it was replaced.
    #[inline]
    pub fn keep_deepest(&mut self, phi: f32, normal: Vec3, location: Vec3) -> bool {
        if phi < self.phi {
            self.phi = phi;
            self.normal = normal;
            self.location = location;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for ContactConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Contact<{} vs {}> phi: {}, normal: {}, location: {}, impulse: {}",
            self.particle_index, self.levelset_index, self.phi, self.normal, self.location, self.accumulated_impulse
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_deeper_geometry_replaces() {
        let mut contact = ContactConstraint::new(1, 0, 0.0);
        assert!(!contact.keep_deepest(0.5, Vec3::X, Vec3::ONE));
        assert!(contact.keep_deepest(-0.5, Vec3::Y, Vec3::ONE));
        assert!(!contact.keep_deepest(-0.25, Vec3::X, Vec3::ZERO));
        assert_eq!(contact.normal, Vec3::Y);
        assert_eq!(contact.phi, -0.5);
        assert!(contact.involves(0) && contact.involves(1) && !contact.involves(2));
    }
}
