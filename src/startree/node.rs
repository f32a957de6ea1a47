use std::ops::{Index, IndexMut};

use fnv::FnvHashMap;

use crate::value::Val;

/// Stable handle into the builder's node pool.
pub type NodeId = usize;

/// Key of the root's slot. Dictionary codes are dense from 0, so the
/// sentinel can never collide with a real code.
pub const ROOT_KEY: u32 = u32::MAX;

/// One tree node. Parent/child edges are pool indices, never pointers, so
/// the parent back-edges needed by level removal cannot form ownership
/// cycles and the pool can be bulk-reset between blocks.
#[derive(Default, Debug)]
pub struct StarNode {
    pub(crate) my_key: u32,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: FnvHashMap<u32, NodeId>,
    /// `measure_columns * TOTAL_AGG_FNS` slots, or empty if this node has
    /// never received a measure contribution.
    pub(crate) agg_values: Vec<Val>,
    /// Only present during a `remove_level` call.
    pub(crate) common_children: Option<FnvHashMap<u32, Vec<NodeId>>>,
}

impl StarNode {
    pub fn my_key(&self) -> u32 {
        self.my_key
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &FnvHashMap<u32, NodeId> {
        &self.children
    }

    pub fn agg_values(&self) -> &[Val] {
        &self.agg_values
    }
}

/// Arena of reusable nodes. Blocks arrive in sequence and the per-block
/// allocation churn dominates without pooling, so `reset` clears links and
/// aggregates but keeps every map's and vector's backing storage.
#[derive(Default, Debug)]
pub struct NodePool {
    nodes: Vec<StarNode>,
    used: usize,
}

impl NodePool {
    /// Returns a node with no children and no aggregates. Reuses the slot
    /// at the cursor if one exists, otherwise grows the pool. The caller
    /// sets `my_key` and `parent`.
    pub fn acquire(&mut self) -> NodeId {
        if self.used >= self.nodes.len() {
            self.nodes.push(StarNode::default());
        }
        let id = self.used;
        self.used += 1;
        id
    }

    pub fn reset(&mut self) {
        for node in &mut self.nodes[..self.used] {
            node.parent = None;
            node.children.clear();
            node.agg_values.clear();
            node.common_children = None;
        }
        self.used = 0;
    }

    /// Number of nodes handed out since the last reset.
    pub fn used(&self) -> usize {
        self.used
    }
}

impl Index<NodeId> for NodePool {
    type Output = StarNode;

    fn index(&self, id: NodeId) -> &StarNode {
        &self.nodes[id]
    }
}

impl IndexMut<NodeId> for NodePool {
    fn index_mut(&mut self, id: NodeId) -> &mut StarNode {
        &mut self.nodes[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_reuses_slots_after_reset() {
        let mut pool = NodePool::default();
        let a = pool.acquire();
        let b = pool.acquire();
        pool[a].children.insert(0, b);
        pool[b].agg_values.push(Val::Int(1));
        assert_eq!(pool.used(), 2);

        pool.reset();
        assert_eq!(pool.used(), 0);
        let a2 = pool.acquire();
        assert_eq!(a2, a);
        assert!(pool[a2].children.is_empty());
        assert!(pool[a2].agg_values.is_empty());
        assert!(pool[a2].parent.is_none());
    }
}
