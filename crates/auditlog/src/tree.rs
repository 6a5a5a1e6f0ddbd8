use crate::crypto;
use crate::node::{HashNode, NodeArena, NodeId};
use crate::{AuditError, Hash, Inclusion, Result, DEFAULT_MAX_LEAVES};

/// Binary hash tree grown one data block at a time.
///
/// `levels[0]` holds the leaves in insertion order and `levels[h]` the nodes
/// at height `h`. The slot of a node's parent is `index / 2` one level up.
/// When a level has an odd count its last node hangs under a provisional
/// parent with no right child; that parent (and its own provisional
/// ancestors) is replaced once a sibling arrives. The top level always holds
/// exactly one node, the root.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    arena: NodeArena,
    levels: Vec<Vec<NodeId>>,
    root: Option<NodeId>,
    max_leaves: usize,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_LEAVES)
    }
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty tree that reports full after `max_leaves` full leaves
    pub fn with_capacity(max_leaves: usize) -> Self {
        Self {
            arena: NodeArena::new(),
            levels: Vec::new(),
            root: None,
            max_leaves: max_leaves.max(1),
        }
    }

    /// Rebuild by replaying `blocks` in order
    pub fn from_blocks<I, T>(blocks: I, max_leaves: usize) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut tree = Self::with_capacity(max_leaves);
        for block in blocks {
            tree.append_data(block)?;
        }
        Ok(tree)
    }

    pub fn root(&self) -> Option<&HashNode> {
        self.root.and_then(|id| self.arena.get(id))
    }

    pub fn root_hash(&self) -> Hash {
        self.root()
            .map(|n| n.hash().to_string())
            .unwrap_or_else(|| crypto::EMPTY_ROOT.to_string())
    }

    pub fn root_level(&self) -> Option<usize> {
        self.root().map(HashNode::level)
    }

    pub fn node(&self, id: NodeId) -> Option<&HashNode> {
        self.arena.get(id)
    }

    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn block_count(&self) -> usize {
        self.leaves().map(|n| n.data_blocks().len()).sum()
    }

    pub fn max_leaves(&self) -> usize {
        self.max_leaves
    }

    fn leaves(&self) -> impl Iterator<Item = &HashNode> + '_ {
        self.levels
            .first()
            .into_iter()
            .flatten()
            .filter_map(|id| self.arena.get(*id))
    }

    /// Every leaf's batch, in insertion order
    pub fn leaf_data_blocks(&self) -> Vec<Vec<String>> {
        self.leaves().map(|n| n.data_blocks().to_vec()).collect()
    }

    /// Node hashes per level, leaves first
    pub fn level_hashes(&self) -> Vec<Vec<Hash>> {
        self.levels
            .iter()
            .map(|level| {
                level
                    .iter()
                    .filter_map(|id| self.arena.get(*id))
                    .map(|n| n.hash().to_string())
                    .collect()
            })
            .collect()
    }

    pub fn is_node_full(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some_and(HashNode::is_full)
    }

    /// Whether the most recent leaf has room left. An empty tree has no leaf
    /// to append to and reports full.
    pub fn is_leaf_full(&self) -> bool {
        match self.last_leaf() {
            Some(id) => self.is_node_full(id),
            None => true,
        }
    }

    /// Capacity is counted in leaves, not levels
    pub fn is_tree_full(&self) -> bool {
        self.leaf_count() >= self.max_leaves && self.is_leaf_full()
    }

    fn last_leaf(&self) -> Option<NodeId> {
        self.levels.first().and_then(|leaves| leaves.last().copied())
    }

    /// Append one block, returning the index of the leaf that holds it
    pub fn append_data(&mut self, data: impl Into<String>) -> Result<usize> {
        let data = data.into();
        match self.last_leaf() {
            Some(leaf) if !self.is_node_full(leaf) => {
                self.arena.append_to_leaf(leaf, data)?;
                self.refresh_spine()?;
            }
            _ => {
                let leaf = self.arena.new_leaf(vec![data])?;
                self.update_tree(leaf, 0)?;
            }
        }
        Ok(self.leaf_count() - 1)
    }

    fn update_tree(&mut self, mut node: NodeId, mut level: usize) -> Result<()> {
        loop {
            if level == self.levels.len() {
                self.levels.push(Vec::new());
            }
            self.levels[level].push(node);
            let count = self.levels[level].len();

            if count == 1 && level + 1 == self.levels.len() {
                self.root = Some(node);
                return Ok(());
            }

            let index = count - 1;
            let parent = if index % 2 == 0 {
                self.arena.new_internal(node, None)?
            } else {
                let sibling = self.levels[level][index - 1];
                self.arena.new_internal(sibling, Some(node))?
            };

            // The parent slot may still hold a provisional node built before
            // this sibling existed.
            if let Some(above) = self.levels.get_mut(level + 1) {
                if above.len() > index / 2 {
                    if let Some(stale) = above.pop() {
                        self.arena.remove(stale);
                    }
                }
            }

            node = parent;
            level += 1;
        }
    }

    /// The last node of each level is an ancestor of the last leaf
    fn refresh_spine(&mut self) -> Result<()> {
        for level in 1..self.levels.len() {
            if let Some(&id) = self.levels[level].last() {
                self.arena.refresh(id)?;
            }
        }
        Ok(())
    }

    /// Inclusion proof: recompute the path from the leaf holding `data` to
    /// the root against the stored hashes
    pub fn verify_data(&self, data: &str) -> bool {
        self.verify_detailed(data).is_verified()
    }

    pub fn verify_detailed(&self, data: &str) -> Inclusion {
        let Some(root) = self.root else {
            return Inclusion::NotFound;
        };
        let Some((leaf_index, leaf_id, leaf)) = self.find_leaf(data) else {
            return Inclusion::NotFound;
        };

        let mut current = leaf_id;
        let mut current_hash = crypto::hash_blocks(leaf.data_blocks());
        if current_hash != leaf.hash() {
            return Inclusion::Mismatch { level: 0 };
        }

        let mut path_len = 0;
        while current != root {
            let Some(parent_id) = self.find_parent(current) else {
                return Inclusion::Mismatch {
                    level: self.arena.get(current).map_or(0, HashNode::level),
                };
            };
            let Some(parent) = self.arena.get(parent_id) else {
                return Inclusion::Mismatch { level: path_len + 1 };
            };

            let combined = if parent.left() == Some(current) {
                let sibling = parent.right().and_then(|id| self.arena.get(id));
                crypto::hash_children(&current_hash, sibling.map(HashNode::hash))
            } else {
                let sibling = parent
                    .left()
                    .and_then(|id| self.arena.get(id))
                    .map_or("", HashNode::hash);
                crypto::hash_children(sibling, Some(&current_hash))
            };

            if combined != parent.hash() {
                return Inclusion::Mismatch {
                    level: parent.level(),
                };
            }

            current = parent_id;
            current_hash = combined;
            path_len += 1;
        }

        Inclusion::Verified {
            leaf_index,
            path_len,
        }
    }

    fn find_leaf(&self, data: &str) -> Option<(usize, NodeId, &HashNode)> {
        self.levels.first()?.iter().enumerate().find_map(|(i, id)| {
            self.arena
                .get(*id)
                .filter(|leaf| leaf.contains(data))
                .map(|leaf| (i, *id, leaf))
        })
    }

    /// No parent pointers are stored; search down from the root
    fn find_parent(&self, target: NodeId) -> Option<NodeId> {
        let mut stack = vec![self.root?];
        while let Some(id) = stack.pop() {
            let node = self.arena.get(id)?;
            for child in [node.left(), node.right()].into_iter().flatten() {
                if child == target {
                    return Some(id);
                }
                if self.arena.get(child).is_some_and(|c| !c.is_leaf()) {
                    stack.push(child);
                }
            }
        }
        None
    }

    /// Overwrites a stored block in place, leaving every hash as it was.
    /// Returns false if no leaf holds `original`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn tamper_block_for_test(&mut self, original: &str, replacement: &str) -> bool {
        let Some((_, id, leaf)) = self.find_leaf(original) else {
            return false;
        };
        let Some(index) = leaf.data_blocks().iter().position(|d| d == original) else {
            return false;
        };
        match self.arena.get_mut(id) {
            Some(node) => {
                node.overwrite_block_for_test(index, replacement);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn node_count_for_test(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn check_structure(&self) -> Result<()> {
        match (self.levels.last(), self.root) {
            (None, None) => Ok(()),
            (Some(top), Some(root)) if top.len() == 1 && top[0] == root => Ok(()),
            _ => Err(AuditError::Structural(
                "top level does not hold exactly the root".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256_hex;

    fn level_sizes(tree: &MerkleTree) -> Vec<usize> {
        tree.levels().iter().map(Vec::len).collect()
    }

    /// Appends `leaves` full leaves' worth of blocks, the last one holding a
    /// single block
    fn tree_with_leaves(leaves: usize) -> MerkleTree {
        let mut tree = MerkleTree::new();
        let blocks = (leaves - 1) * 4 + 1;
        for i in 0..blocks {
            tree.append_data(format!("event{i}")).unwrap();
        }
        tree
    }

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let mut tree = MerkleTree::new();
        assert_eq!(tree.root_hash(), crypto::EMPTY_ROOT);

        tree.append_data("event1").unwrap();
        assert_eq!(tree.root_hash(), sha256_hex(b"event1"));
        assert_eq!(tree.root_level(), Some(0));

        tree.append_data("event2").unwrap();
        assert_eq!(tree.root_hash(), sha256_hex(b"event1event2"));
        assert_eq!(level_sizes(&tree), vec![1]);
    }

    #[test]
    fn test_fifth_block_opens_second_leaf() {
        let mut tree = MerkleTree::new();
        for i in 1..=4 {
            tree.append_data(format!("event{i}")).unwrap();
        }
        assert_eq!(level_sizes(&tree), vec![1]);
        assert!(tree.is_leaf_full());

        let leaf_index = tree.append_data("event5").unwrap();
        assert_eq!(leaf_index, 1);
        assert_eq!(level_sizes(&tree), vec![2, 1]);
        assert_eq!(tree.root_level(), Some(1));
    }

    #[test]
    fn test_shape_after_each_leaf() {
        let mut tree = MerkleTree::new();
        for i in 0..4 {
            tree.append_data(format!("a{i}")).unwrap();
        }
        assert_eq!(level_sizes(&tree), vec![1]);

        tree.append_data("b0").unwrap();
        assert_eq!(level_sizes(&tree), vec![2, 1]);
        let parent = tree.node(tree.levels()[1][0]).unwrap();
        assert!(parent.right().is_some());

        for i in 1..4 {
            tree.append_data(format!("b{i}")).unwrap();
        }
        tree.append_data("c0").unwrap();
        assert_eq!(level_sizes(&tree), vec![3, 2, 1]);
        let provisional = tree.node(tree.levels()[1][1]).unwrap();
        assert_eq!(provisional.left(), Some(tree.levels()[0][2]));
        assert_eq!(provisional.right(), None);
        tree.check_structure().unwrap();
    }

    #[test]
    fn test_pairing_counts_and_height() {
        for k in 1..=40usize {
            let tree = tree_with_leaves(k);
            assert_eq!(tree.leaf_count(), k);
            if k >= 2 {
                assert_eq!(tree.levels()[1].len(), k.div_ceil(2), "k = {k}");
            }
            // ceil(log2 k)
            let expected_height = (usize::BITS - (k - 1).leading_zeros()) as usize;
            assert_eq!(tree.root_level(), Some(expected_height), "k = {k}");
            assert_eq!(tree.levels().len(), expected_height + 1);
            tree.check_structure().unwrap();
        }
    }

    #[test]
    fn test_replaced_provisionals_leave_the_arena() {
        let tree = tree_with_leaves(6);
        // 6 leaves + 3 + 2 + 1 nodes above them
        assert_eq!(tree.node_count_for_test(), 12);
    }

    #[test]
    fn test_every_block_verifies() {
        let mut tree = MerkleTree::new();
        let items: Vec<String> = (0..37).map(|i| format!("event{i}")).collect();
        for item in &items {
            tree.append_data(item.clone()).unwrap();
            assert!(tree.verify_data(item));
        }
        for item in &items {
            assert!(tree.verify_data(item), "{item} should verify");
        }
        assert!(!tree.verify_data("missing"));
        assert_eq!(tree.verify_detailed("missing"), Inclusion::NotFound);
    }

    #[test]
    fn test_batched_append_keeps_earlier_leaves_verifiable() {
        let mut tree = MerkleTree::new();
        for i in 1..=5 {
            tree.append_data(format!("event{i}")).unwrap();
        }
        let root_before = tree.root_hash();
        tree.append_data("event6").unwrap();
        assert_ne!(tree.root_hash(), root_before);
        assert!(tree.verify_data("event3"));
        assert!(tree.verify_data("event6"));
    }

    #[test]
    fn test_tampered_block_reports_leaf_level() {
        let mut tree = tree_with_leaves(5);
        assert!(tree.tamper_block_for_test("event2", "forged"));
        assert_eq!(tree.verify_detailed("forged"), Inclusion::Mismatch { level: 0 });
        assert!(!tree.verify_data("event2"));
        assert!(tree.verify_data("event7"));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let blocks: Vec<String> = (0..23).map(|i| format!("{{\"op\":{i}}}")).collect();
        let a = MerkleTree::from_blocks(blocks.clone(), 16).unwrap();
        let b = MerkleTree::from_blocks(blocks, 16).unwrap();
        assert_eq!(a.root_hash(), b.root_hash());
        assert_eq!(a.level_hashes(), b.level_hashes());
        assert_eq!(a.leaf_data_blocks(), b.leaf_data_blocks());
    }

    #[test]
    fn test_tree_full_counts_leaves() {
        let mut tree = MerkleTree::with_capacity(2);
        for i in 0..7 {
            tree.append_data(format!("e{i}")).unwrap();
            assert!(!tree.is_tree_full());
        }
        tree.append_data("e7").unwrap();
        assert!(tree.is_tree_full());
    }
}
