use glam::Vec3;

use crate::physics::trees::tree::Tree;
use crate::utilities::bounding_box::BoundingBox;

const SAMPLE_TREE_MAX_DEPTH: usize = 12;
const SAMPLE_TREE_LEAF_SIZE: usize = 4;

/// Local-space sample points of a body, with a hierarchy for culling samples against a region.
#[derive(Debug, Clone)]
pub struct CollisionParticles {
    points: Vec<Vec3>,
    tree: Tree,
}

impl CollisionParticles {
    pub fn new(points: Vec<Vec3>) -> Self {
        let entries = points
            .iter()
            .enumerate()
            .map(|(index, point)| (index, BoundingBox::new(*point, *point)))
            .collect();
        Self {
            tree: Tree::build(entries, SAMPLE_TREE_MAX_DEPTH, SAMPLE_TREE_LEAF_SIZE),
            points,
        }
    }

    #[inline]
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Indices of samples inside `region` (local space), ascending.
    pub fn find_all_intersections(&self, region: &BoundingBox) -> Vec<usize> {
        self.tree.find_all_intersections(region)
    }
}
