use std::hash::Hash;

use serde::{Deserialize, Serialize};

// Newtype Pattern for enhanced type safety
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct EvolutionId(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ProxyId(pub u32);

/// Caller-side handle to an evolution owned by the physics task.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EvolutionHandle {
    pub id: EvolutionId,
}

// Simple implementations for Display for user-friendliness
impl std::fmt::Display for EvolutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "EvolutionId<{}>", self.0)
    }
}

impl std::fmt::Display for ProxyId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ProxyId<{}>", self.0)
    }
}

impl std::fmt::Display for EvolutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "EvolutionHandle<{}>", self.id.0)
    }
}

/// Mapping from pre-compaction particle indices to post-compaction indices.
/// Retired particles map to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRemap {
    pub old_to_new: Vec<Option<usize>>,
}

impl IndexRemap {
    /// Looks up where `old` lives after compaction.
    pub fn get(&self, old: usize) -> Option<usize> {
        self.old_to_new.get(old).copied().flatten()
    }

    /// Rewrites a list of indices in place, dropping retired entries.
    pub fn apply(&self, indices: &mut Vec<usize>) {
        indices.retain_mut(|index| match self.get(*index) {
            Some(new_index) => {
                *index = new_index;
                true
            }
            None => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_drops_retired_indices() {
        let remap = IndexRemap {
            old_to_new: vec![Some(0), None, Some(1), Some(2)],
        };
        let mut owned = vec![3, 1, 0];
        remap.apply(&mut owned);
        assert_eq!(owned, vec![2, 0]);
    }

    #[test]
    fn handles_display() {
        assert_eq!(EvolutionId(3).to_string(), "EvolutionId<3>");
        assert_eq!(ProxyId(7).to_string(), "ProxyId<7>");
    }
}
