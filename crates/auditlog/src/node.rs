use std::collections::HashMap;

use crate::crypto;
use crate::{AuditError, Hash, Result, MAX_NODE_SIZE};

/// Arena handle for a node. Ids are never reused within a tree.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(u64);

/// A leaf (batch of raw payloads) or an internal node (one or two children)
#[derive(Clone, Debug)]
pub struct HashNode {
    hash: Hash,
    data_blocks: Vec<String>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    /// 0 = leaf
    level: usize,
}

impl HashNode {
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn data_blocks(&self) -> &[String] {
        &self.data_blocks
    }

    pub fn left(&self) -> Option<NodeId> {
        self.left
    }

    pub fn right(&self) -> Option<NodeId> {
        self.right
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Only leaves fill up; internal nodes are never full
    pub fn is_full(&self) -> bool {
        self.is_leaf() && self.data_blocks.len() >= MAX_NODE_SIZE
    }

    pub fn contains(&self, data: &str) -> bool {
        self.data_blocks.iter().any(|d| d == data)
    }

    /// Rewrites a stored block without touching any hash
    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn overwrite_block_for_test(&mut self, index: usize, data: &str) {
        if let Some(block) = self.data_blocks.get_mut(index) {
            *block = data.to_string();
        }
    }

    fn append_to_leaf(&mut self, data: String) -> Result<()> {
        if !self.is_leaf() {
            return Err(AuditError::Structural("append to internal node".into()));
        }
        if self.is_full() {
            return Err(AuditError::Structural("append to full leaf".into()));
        }
        self.data_blocks.push(data);
        self.hash = crypto::hash_blocks(&self.data_blocks);
        Ok(())
    }
}

/// Owns every node of one tree. A child id is held by at most one parent.
#[derive(Clone, Debug, Default)]
pub struct NodeArena {
    nodes: HashMap<NodeId, HashNode>,
    next_id: u64,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&HashNode> {
        self.nodes.get(&id)
    }

    fn insert(&mut self, node: HashNode) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<HashNode> {
        self.nodes.remove(&id)
    }

    /// Level-0 node holding `initial_data`
    pub fn new_leaf(&mut self, initial_data: Vec<String>) -> Result<NodeId> {
        if initial_data.is_empty() {
            return Err(AuditError::Structural("leaf without data blocks".into()));
        }
        if initial_data.len() > MAX_NODE_SIZE {
            return Err(AuditError::Structural(format!(
                "leaf with {} blocks exceeds capacity {MAX_NODE_SIZE}",
                initial_data.len()
            )));
        }
        let hash = crypto::hash_blocks(&initial_data);
        Ok(self.insert(HashNode {
            hash,
            data_blocks: initial_data,
            left: None,
            right: None,
            level: 0,
        }))
    }

    /// Parent of `left` and an optional `right`
    pub fn new_internal(&mut self, left: NodeId, right: Option<NodeId>) -> Result<NodeId> {
        let (hash, level) = self.combine(left, right)?;
        Ok(self.insert(HashNode {
            hash,
            data_blocks: Vec::new(),
            left: Some(left),
            right,
            level,
        }))
    }

    pub fn append_to_leaf(&mut self, id: NodeId, data: String) -> Result<()> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| AuditError::Structural(format!("unknown node {id:?}")))?
            .append_to_leaf(data)
    }

    /// Recompute an internal node's hash from its current children
    pub(crate) fn refresh(&mut self, id: NodeId) -> Result<()> {
        let (left, right) = match self.nodes.get(&id) {
            Some(HashNode { left: Some(l), right, .. }) => (*l, *right),
            Some(_) => return Ok(()),
            None => return Err(AuditError::Structural(format!("unknown node {id:?}"))),
        };
        let (hash, _) = self.combine(left, right)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.hash = hash;
        }
        Ok(())
    }

    fn combine(&self, left: NodeId, right: Option<NodeId>) -> Result<(Hash, usize)> {
        let l = self
            .get(left)
            .ok_or_else(|| AuditError::Structural(format!("unknown left child {left:?}")))?;
        let r = match right {
            Some(id) => Some(
                self.get(id)
                    .ok_or_else(|| AuditError::Structural(format!("unknown right child {id:?}")))?,
            ),
            None => None,
        };
        let hash = crypto::hash_children(l.hash(), r.map(HashNode::hash));
        let level = l.level().max(r.map_or(0, HashNode::level)) + 1;
        Ok((hash, level))
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut HashNode> {
        self.nodes.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256_hex;

    fn blocks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_leaf_hash_covers_all_blocks() {
        let mut arena = NodeArena::new();
        let id = arena.new_leaf(blocks(&["event1"])).unwrap();
        assert_eq!(arena.get(id).unwrap().hash(), sha256_hex(b"event1"));

        arena.append_to_leaf(id, "event2".into()).unwrap();
        let leaf = arena.get(id).unwrap();
        assert_eq!(leaf.hash(), sha256_hex(b"event1event2"));
        assert_eq!(leaf.level(), 0);
        assert!(!leaf.is_full());
    }

    #[test]
    fn test_full_leaf_rejects_append() {
        let mut arena = NodeArena::new();
        let id = arena.new_leaf(blocks(&["a", "b", "c", "d"])).unwrap();
        assert!(arena.get(id).unwrap().is_full());
        assert!(matches!(
            arena.append_to_leaf(id, "e".into()),
            Err(AuditError::Structural(_))
        ));
    }

    #[test]
    fn test_leaf_requires_data() {
        let mut arena = NodeArena::new();
        assert!(arena.new_leaf(Vec::new()).is_err());
        assert!(arena.new_leaf(blocks(&["1", "2", "3", "4", "5"])).is_err());
    }

    #[test]
    fn test_internal_node_hash_and_level() {
        let mut arena = NodeArena::new();
        let a = arena.new_leaf(blocks(&["a"])).unwrap();
        let b = arena.new_leaf(blocks(&["b"])).unwrap();
        let parent = arena.new_internal(a, Some(b)).unwrap();

        let expected = sha256_hex(format!("{}{}", sha256_hex(b"a"), sha256_hex(b"b")).as_bytes());
        let node = arena.get(parent).unwrap();
        assert_eq!(node.hash(), expected);
        assert_eq!(node.level(), 1);
        assert!(!node.is_leaf());
        assert!(!node.is_full());

        let lone = arena.new_internal(parent, None).unwrap();
        assert_eq!(arena.get(lone).unwrap().level(), 2);
        assert_eq!(arena.get(lone).unwrap().hash(), sha256_hex(expected.as_bytes()));
    }

    #[test]
    fn test_internal_node_rejects_append_and_unknown_children() {
        let mut arena = NodeArena::new();
        let a = arena.new_leaf(blocks(&["a"])).unwrap();
        let parent = arena.new_internal(a, None).unwrap();
        assert!(arena.append_to_leaf(parent, "x".into()).is_err());

        arena.remove(a);
        assert!(arena.new_internal(a, None).is_err());
    }
}
