use std::cmp::Ordering;

use super::node::{Leaf, Node, NodeChild};
use crate::utilities::bounding_box::BoundingBox;

/// Maximum stack depth for iterative tree traversals.
pub const TRAVERSAL_STACK_CAPACITY: usize = 256;

/// A binary bounding volume tree built top-down by median split.
///
/// The tree is rebuilt from scratch whenever its contents change; it never refits. Depth is capped by
/// `max_depth`, after which all remaining items share one leaf.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    leaves: Vec<Leaf>,
    items: Vec<usize>,
    item_bounds: Vec<BoundingBox>,
    root: Option<NodeChild>,
}

impl Tree {
    /// Encodes a leaf index into the negative-index form used by node children.
    #[inline(always)]
    pub fn encode(index: i32) -> i32 {
        -1 - index
    }

    /// Builds a tree over `(item, bounds)` entries.
    pub fn build(mut entries: Vec<(usize, BoundingBox)>, max_depth: usize, leaf_size: usize) -> Self {
        let mut tree = Self {
            nodes: Vec::with_capacity(entries.len()),
            leaves: Vec::with_capacity(entries.len() / leaf_size.max(1) + 1),
            items: Vec::with_capacity(entries.len()),
            item_bounds: Vec::with_capacity(entries.len()),
            root: None,
        };
        if !entries.is_empty() {
            let root = tree.build_child(&mut entries, 0, max_depth, leaf_size.max(1));
            tree.root = Some(root);
        }
        tree
    }

    fn build_child(
        &mut self,
        entries: &mut [(usize, BoundingBox)],
        depth: usize,
        max_depth: usize,
        leaf_size: usize,
    ) -> NodeChild {
        let mut bounds = BoundingBox::EMPTY;
        let mut centroid_bounds = BoundingBox::EMPTY;
        for (_, entry_bounds) in entries.iter() {
            bounds = BoundingBox::create_merged(&bounds, entry_bounds);
            centroid_bounds.grow_to_include(entry_bounds.center());
        }

        if entries.len() <= leaf_size || depth >= max_depth {
            let leaf_index = self.leaves.len() as i32;
            self.leaves.push(Leaf::new(self.items.len() as u32, entries.len() as u32));
            for (item, item_bounds) in entries.iter() {
                self.items.push(*item);
                self.item_bounds.push(*item_bounds);
            }
            return NodeChild {
                bounds,
                index: Self::encode(leaf_index),
                leaf_count: entries.len() as i32,
            };
        }

        let axis = centroid_bounds.largest_axis();
        entries.sort_by(|(a_item, a), (b_item, b)| {
            a.center()[axis]
                .partial_cmp(&b.center()[axis])
                .unwrap_or(Ordering::Equal)
                .then(a_item.cmp(b_item))
        });
        let split = entries.len() / 2;
        let node_index = self.nodes.len();
        let placeholder = NodeChild {
            bounds,
            index: 0,
            leaf_count: 0,
        };
        self.nodes.push(Node {
            a: placeholder,
            b: placeholder,
        });
        let (left, right) = entries.split_at_mut(split);
        let a = self.build_child(left, depth + 1, max_depth, leaf_size);
        let b = self.build_child(right, depth + 1, max_depth, leaf_size);
        self.nodes[node_index] = Node { a, b };
        NodeChild {
            bounds,
            index: node_index as i32,
            leaf_count: a.leaf_count + b.leaf_count,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of items stored in the tree.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bounds of everything in the tree.
    pub fn root_bounds(&self) -> Option<BoundingBox> {
        self.root.map(|root| root.bounds)
    }

    /// Depth of the deepest leaf. An empty tree or a single leaf has depth zero.
    pub fn compute_max_depth(&self) -> usize {
        fn depth_of(tree: &Tree, child: &NodeChild) -> usize {
            if child.index < 0 {
                0
            } else {
                let node = &tree.nodes[child.index as usize];
                1 + depth_of(tree, &node.a).max(depth_of(tree, &node.b))
            }
        }
        self.root.as_ref().map_or(0, |root| depth_of(self, root))
    }

    /// Appends every item whose bounds intersect `query` to `out`, in ascending item order.
    pub fn find_all_intersections_into(&self, query: &BoundingBox, out: &mut Vec<usize>) {
        let Some(root) = self.root else {
            return;
        };
        if !root.bounds.intersects(query) {
            return;
        }
        let start = out.len();
        let mut stack: Vec<NodeChild> = Vec::with_capacity(TRAVERSAL_STACK_CAPACITY.min(self.nodes.len() + 1));
        stack.push(root);
        while let Some(child) = stack.pop() {
            if child.index < 0 {
                let leaf = self.leaves[Self::encode(child.index) as usize];
                for slot in leaf.range() {
                    if self.item_bounds[slot].intersects(query) {
                        out.push(self.items[slot]);
                    }
                }
            } else {
                let node = &self.nodes[child.index as usize];
                if node.a.bounds.intersects(query) {
                    stack.push(node.a);
                }
                if node.b.bounds.intersects(query) {
                    stack.push(node.b);
                }
            }
        }
        out[start..].sort_unstable();
    }

    /// Returns every item whose bounds intersect `query`, in ascending order.
    pub fn find_all_intersections(&self, query: &BoundingBox) -> Vec<usize> {
        let mut out = Vec::new();
        self.find_all_intersections_into(query, &mut out);
        out
    }
}
