use crate::SealedTree;

/// Final roots of sealed trees, oldest first
#[derive(Clone, Debug, Default)]
pub struct RootHistory {
    sealed: Vec<SealedTree>,
}

impl RootHistory {
    pub fn new() -> Self {
        Self { sealed: Vec::new() }
    }

    pub fn record(&mut self, tree: SealedTree) {
        self.sealed.push(tree);
    }

    /// Drop the newest entry when its seal did not become durable
    pub(crate) fn pop(&mut self) -> Option<SealedTree> {
        self.sealed.pop()
    }

    pub fn len(&self) -> usize {
        self.sealed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sealed.is_empty()
    }

    pub fn root_by_tree(&self, tree_index: u64) -> Option<&str> {
        self.sealed
            .iter()
            .find(|t| t.tree_index == tree_index)
            .map(|t| t.root_hash.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(tree_index: u64, root: &str) -> SealedTree {
        SealedTree {
            tree_index,
            root_hash: root.to_string(),
        }
    }

    #[test]
    fn test_lookup_and_pop() {
        let mut history = RootHistory::new();
        history.record(sealed(0, "r0"));
        history.record(sealed(1, "r1"));
        assert_eq!(history.root_by_tree(1), Some("r1"));

        assert_eq!(history.pop(), Some(sealed(1, "r1")));
        assert_eq!(history.len(), 1);
        assert_eq!(history.root_by_tree(1), None);
        assert_eq!(history.root_by_tree(0), Some("r0"));
    }
}
