use glam::{Mat3, Vec3};

use super::shape::Shape;
use crate::physics::body_properties::RigidPose;
use crate::utilities::bounding_box::BoundingBox;

/// One child of a union, placed in the union's local space.
#[derive(Debug, Clone)]
pub struct UnionChild {
    pub shape: Shape,
    pub pose: RigidPose,
}

/// A shape made of other shapes. Phi is the minimum over all children.
#[derive(Debug, Clone)]
pub struct ImplicitUnion {
    children: Vec<UnionChild>,
    bounds: Option<BoundingBox>,
}

impl ImplicitUnion {
    pub fn new(children: Vec<UnionChild>) -> Self {
        assert!(!children.is_empty(), "A union needs at least one child.");
        let mut bounds = Some(BoundingBox::EMPTY);
        for child in &children {
            bounds = match (bounds, child.shape.bounding_box()) {
                (Some(merged), Some(child_bounds)) => Some(BoundingBox::create_merged(
                    &merged,
                    &child_bounds.transformed(&child.pose),
                )),
                _ => None,
            };
        }
        Self { children, bounds }
    }

    pub fn children(&self) -> &[UnionChild] {
        &self.children
    }

    /// Bounds in the union's local space, or `None` if any child is unbounded.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bounds
    }

    pub fn phi_with_normal(&self, point: Vec3) -> (f32, Vec3) {
        let mut best = (f32::MAX, Vec3::Z);
        for child in &self.children {
            let local = child.pose.inverse_transform_point(point);
            let (phi, normal) = child.shape.phi_with_normal(local);
            if phi < best.0 {
                best = (phi, child.pose.transform_vector(normal));
            }
        }
        best
    }

    /// Collects every non-union leaf whose bounds overlap `query`, which is expressed in this union's space.
    /// Leaf poses are composed with `parent` so nested unions flatten into one list.
    pub fn find_all_intersecting_objects<'a>(
        &'a self,
        query: &BoundingBox,
        parent: &RigidPose,
        out: &mut Vec<(&'a Shape, RigidPose)>,
    ) {
        for child in &self.children {
            let pose = child.pose.then(parent);
            let overlaps = match child.shape.bounding_box() {
                Some(bounds) => bounds.transformed(&pose).intersects(query),
                None => true,
            };
            if !overlaps {
                continue;
            }
            match &child.shape {
                Shape::Union(inner) => inner.find_all_intersecting_objects(query, &pose, out),
                leaf => out.push((leaf, pose)),
            }
        }
    }

    /// Collects every non-union leaf with its pose composed with `parent`.
    pub fn accumulate_all_objects<'a>(&'a self, parent: &RigidPose, out: &mut Vec<(&'a Shape, RigidPose)>) {
        for child in &self.children {
            let pose = child.pose.then(parent);
            match &child.shape {
                Shape::Union(inner) => inner.accumulate_all_objects(&pose, out),
                leaf => out.push((leaf, pose)),
            }
        }
    }

    /// Approximates the inertia by splitting the mass evenly across children.
    pub fn compute_inertia(&self, mass: f32) -> Mat3 {
        let share = mass / self.children.len() as f32;
        let mut inertia = Mat3::ZERO;
        for child in &self.children {
            let local = child.shape.compute_inertia(share);
            let rotation = Mat3::from_quat(child.pose.orientation);
            let r = child.pose.position;
            // Parallel axis theorem.
            let shift = Mat3::from_diagonal(Vec3::splat(r.length_squared()))
                - Mat3::from_cols(r * r.x, r * r.y, r * r.z);
            inertia += rotation * local * rotation.transpose() + shift * share;
        }
        inertia
    }

    pub fn compute_sample_points(&self) -> Vec<Vec3> {
        self.children
            .iter()
            .flat_map(|child| {
                child
                    .shape
                    .compute_sample_points()
                    .into_iter()
                    .map(move |p| child.pose.transform_point(p))
            })
            .collect()
    }
}
