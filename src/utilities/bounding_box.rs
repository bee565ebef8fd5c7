use glam::Vec3;

use crate::physics::body_properties::RigidPose;

/// Provides simple axis-aligned bounding box functionality.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Location with the lowest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub min: Vec3,
    /// Location with the highest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    /// Inverted box that becomes valid after the first `grow_to_include`.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    /// Constructs a bounding box from the specified minimum and maximum.
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Constructs a bounding box centered on `center` with the given half extents.
    #[inline]
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Returns true if min <= max on every axis.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Determines if a bounding box intersects another bounding box. Touching boxes intersect.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        Self::intersects_bounds(self.min, self.max, other.min, other.max)
    }

    /// Determines if a bounding box intersects another bounding box.
    #[inline]
    pub fn intersects_bounds(min_a: Vec3, max_a: Vec3, min_b: Vec3, max_b: Vec3) -> bool {
        let no_intersection_on_axes = max_a.cmplt(min_b) | max_b.cmplt(min_a);
        !no_intersection_on_axes.any()
    }

    /// Returns true if the point lies inside or on the boundary of the box.
    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Computes the volume of the bounding box.
    #[inline]
    pub fn compute_volume(&self) -> f32 {
        let diagonal = self.max - self.min;
        diagonal.x * diagonal.y * diagonal.z
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Full edge lengths of the box.
    #[inline]
    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    /// Index of the axis with the largest extent.
    pub fn largest_axis(&self) -> usize {
        let e = self.extents();
        if e.x >= e.y && e.x >= e.z {
            0
        } else if e.y >= e.z {
            1
        } else {
            2
        }
    }

    /// Computes a bounding box which contains two other bounding boxes.
    #[inline]
    pub fn create_merged(a: &Self, b: &Self) -> Self {
        Self {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    /// Expands the box so it contains `point`.
    #[inline]
    pub fn grow_to_include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Expands the box uniformly by `thickness` on every side.
    #[inline]
    pub fn thicken(&mut self, thickness: f32) {
        self.min -= Vec3::splat(thickness);
        self.max += Vec3::splat(thickness);
    }

    /// Expands the box per axis by the magnitude of `thickness`.
    #[inline]
    pub fn thicken_vec(&mut self, thickness: Vec3) {
        let t = thickness.abs();
        self.min -= t;
        self.max += t;
    }

    /// Returns the eight corners of the box.
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Computes the axis-aligned box bounding this box after it is moved by `pose`.
    pub fn transformed(&self, pose: &RigidPose) -> Self {
        let mut result = Self::EMPTY;
        for corner in self.corners() {
            result.grow_to_include(pose.transform_point(corner));
        }
        result
    }

    /// Creates the smallest possible bounding box that contains a list of points.
    pub fn from_points(points: &[Vec3]) -> Self {
        if points.is_empty() {
            panic!("Cannot construct a bounding box from an empty list.");
        }
        let mut result = Self::new(points[0], points[0]);
        for point in points.iter().skip(1) {
            result.grow_to_include(*point);
        }
        result
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({}, {})", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn touching_boxes_intersect() {
        let a = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        let b = BoundingBox::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
        let c = BoundingBox::new(Vec3::new(1.01, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn transformed_box_contains_rotated_corners() {
        let b = BoundingBox::from_center(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let pose = RigidPose::new(
            Vec3::new(5.0, 0.0, 0.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        let t = b.transformed(&pose);
        assert!((t.min - Vec3::new(4.0, -2.0, -1.0)).length() < 1e-5);
        assert!((t.max - Vec3::new(6.0, 2.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn thicken_grows_every_side() {
        let mut b = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        b.thicken(0.5);
        assert_eq!(b.min, Vec3::splat(-0.5));
        assert_eq!(b.max, Vec3::splat(1.5));
        assert_eq!(b.largest_axis(), 0);
    }

    #[test]
    #[should_panic(expected = "empty list")]
    fn from_points_rejects_empty_input() {
        BoundingBox::from_points(&[]);
    }
}
