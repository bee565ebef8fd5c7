use crate::utilities::bounding_box::BoundingBox;

/// A child reference in a tree node, containing bounding box and metadata.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeChild {
    /// Bounds of everything under this child.
    pub bounds: BoundingBox,
    /// Index of a node when non-negative; an encoded leaf index when negative.
    pub index: i32,
    /// Number of items under this child.
    pub leaf_count: i32,
}

/// 2-wide tree node.
///
/// Note that the format of this node implies that we don't explicitly test against the root bounding box
/// during traversal; the root child's bounds are tested once up front.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node {
    pub a: NodeChild,
    pub b: NodeChild,
}

/// A bucket of items at the bottom of the tree.
///
/// Leaves hold a contiguous range of the tree's item list; the depth cap means a leaf can hold many items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Leaf {
    pub start: u32,
    pub count: u32,
}

impl Leaf {
    #[inline(always)]
    pub fn new(start: u32, count: u32) -> Self {
        Self { start, count }
    }

    #[inline(always)]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..(self.start + self.count) as usize
    }
}
