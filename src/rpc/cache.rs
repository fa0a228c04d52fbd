//! Per-connection reference cache.
//!
//! Both endpoints assign indices in the same deterministic order (the order
//! new subtrees first appear in the record stream), so an index sent on the
//! wire means the same node on both sides without ever exchanging a table.
//! Entries are never evicted: the cache lives exactly as long as the
//! connection, and a stale index is a protocol error, not a miss.

use crate::error::{Result, WireError};
use crate::tree::NodeId;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct RefCache {
    by_node: HashMap<NodeId, u32>,
    by_index: Vec<NodeId>,
}

impl RefCache {
    pub fn new() -> Self {
        RefCache::default()
    }

    /// Look up `node`, assigning the next free index on a miss.
    /// Returns `(index, known)` where `known` is true on a hit.
    pub fn get_or_assign(&mut self, node: NodeId) -> (u32, bool) {
        if let Some(&index) = self.by_node.get(&node) {
            return (index, true);
        }
        let index = self.by_index.len() as u32;
        self.by_node.insert(node, index);
        self.by_index.push(node);
        (index, false)
    }

    /// Resolve an index received on the wire.
    pub fn get_by_index(&self, index: u32) -> Result<NodeId> {
        self.by_index
            .get(index as usize)
            .copied()
            .ok_or_else(|| {
                WireError::Protocol(format!(
                    "reference index {index} out of range (cache has {} entries)",
                    self.by_index.len()
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_assigned_in_order() {
        let mut cache = RefCache::new();
        assert_eq!(cache.get_or_assign(NodeId(10)), (0, false));
        assert_eq!(cache.get_or_assign(NodeId(20)), (1, false));
        assert_eq!(cache.get_or_assign(NodeId(10)), (0, true));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lookup_by_index() {
        let mut cache = RefCache::new();
        cache.get_or_assign(NodeId(7));
        assert_eq!(cache.get_by_index(0).unwrap(), NodeId(7));
    }

    #[test]
    fn test_out_of_range_index_is_fatal() {
        let cache = RefCache::new();
        let err = cache.get_by_index(3).unwrap_err();
        assert!(err.is_connection_fatal());
        assert!(err.to_string().contains("out of range"));
    }
}
