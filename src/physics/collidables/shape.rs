use glam::{Mat3, Vec3};

use super::box_shape::BoxShape;
use super::implicit_union::ImplicitUnion;
use super::level_set::LevelSet;
use super::plane::Plane;
use super::sphere::Sphere;
use crate::physics::body_properties::RigidPose;
use crate::utilities::bounding_box::BoundingBox;

/// Type tag of a shape. The ordering is used to normalize shape pairs before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShapeKind {
    Box,
    Sphere,
    Plane,
    LevelSet,
    Union,
}

/// Closed set of implicit collision geometries.
#[derive(Debug, Clone)]
pub enum Shape {
    Box(BoxShape),
    Sphere(Sphere),
    Plane(Plane),
    LevelSet(LevelSet),
    Union(ImplicitUnion),
}

impl Shape {
    #[inline]
    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Box(_) => ShapeKind::Box,
            Shape::Sphere(_) => ShapeKind::Sphere,
            Shape::Plane(_) => ShapeKind::Plane,
            Shape::LevelSet(_) => ShapeKind::LevelSet,
            Shape::Union(_) => ShapeKind::Union,
        }
    }

    /// Signed distance from a local-space point to the surface, with the outward local normal.
    pub fn phi_with_normal(&self, point: Vec3) -> (f32, Vec3) {
        match self {
            Shape::Box(b) => b.phi_with_normal(point),
            Shape::Sphere(s) => s.phi_with_normal(point),
            Shape::Plane(p) => p.phi_with_normal(point),
            Shape::LevelSet(l) => l.phi_with_normal(point),
            Shape::Union(u) => u.phi_with_normal(point),
        }
    }

    /// Local-space bounds. Unbounded shapes (planes, unions containing planes) return `None`.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        match self {
            Shape::Box(b) => Some(b.bounding_box()),
            Shape::Sphere(s) => Some(s.bounding_box()),
            Shape::Plane(_) => None,
            Shape::LevelSet(l) => Some(l.bounding_box()),
            Shape::Union(u) => u.bounding_box(),
        }
    }

    #[inline]
    pub fn has_bounding_box(&self) -> bool {
        self.bounding_box().is_some()
    }

    /// Local inertia tensor for the given mass. Unbounded shapes report the identity scaled by mass.
    pub fn compute_inertia(&self, mass: f32) -> Mat3 {
        match self {
            Shape::Box(b) => b.compute_inertia(mass),
            Shape::Sphere(s) => s.compute_inertia(mass),
            Shape::Plane(_) => Mat3::from_diagonal(Vec3::splat(mass)),
            Shape::LevelSet(l) => BoxShape::from_min_max(l.bounding_box().min, l.bounding_box().max)
                .compute_inertia(mass),
            Shape::Union(u) => u.compute_inertia(mass),
        }
    }

    /// Default local-space collision particles used by sampled collision tests.
    pub fn compute_sample_points(&self) -> Vec<Vec3> {
        match self {
            Shape::Box(b) => b.compute_sample_points(),
            Shape::Sphere(s) => s.compute_sample_points(),
            Shape::Plane(_) => Vec::new(),
            Shape::LevelSet(l) => {
                let bounds = l.bounding_box();
                // Pull the bounding box samples onto the zero isosurface.
                BoxShape::from_min_max(bounds.min, bounds.max)
                    .compute_sample_points()
                    .into_iter()
                    .map(|p| {
                        let (phi, normal) = l.phi_with_normal(p);
                        p - normal * phi
                    })
                    .collect()
            }
            Shape::Union(u) => u.compute_sample_points(),
        }
    }

    /// Leaves of this shape whose bounds overlap `query` (expressed in this shape's local space).
    /// A non-union shape reports itself with the identity pose.
    pub fn find_all_intersecting_objects(&self, query: &BoundingBox) -> Vec<(&Shape, RigidPose)> {
        match self {
            Shape::Union(u) => {
                let mut out = Vec::new();
                u.find_all_intersecting_objects(query, &RigidPose::IDENTITY, &mut out);
                out
            }
            leaf => vec![(leaf, RigidPose::IDENTITY)],
        }
    }

    /// All leaves of this shape in local space.
    pub fn accumulate_all_objects(&self) -> Vec<(&Shape, RigidPose)> {
        match self {
            Shape::Union(u) => {
                let mut out = Vec::new();
                u.accumulate_all_objects(&RigidPose::IDENTITY, &mut out);
                out
            }
            leaf => vec![(leaf, RigidPose::IDENTITY)],
        }
    }
}

impl From<BoxShape> for Shape {
    fn from(shape: BoxShape) -> Self {
        Shape::Box(shape)
    }
}

impl From<Sphere> for Shape {
    fn from(shape: Sphere) -> Self {
        Shape::Sphere(shape)
    }
}

impl From<Plane> for Shape {
    fn from(shape: Plane) -> Self {
        Shape::Plane(shape)
    }
}

impl From<LevelSet> for Shape {
    fn from(shape: LevelSet) -> Self {
        Shape::LevelSet(shape)
    }
}

impl From<ImplicitUnion> for Shape {
    fn from(shape: ImplicitUnion) -> Self {
        Shape::Union(shape)
    }
}
