//! Offline recomputation of a chain of persisted snapshots

use serde::{Deserialize, Serialize};

use crate::{AuditLogSnapshot, MerkleTree, DEFAULT_MAX_LEAVES};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    /// Leaves no longer hash to the recorded root
    RootMismatch { expected: String, actual: String },
    /// First level whose recorded hashes differ from the recomputed ones
    LevelMismatch { level: usize },
    /// First block is not the previous tree's root
    BrokenLink,
    MissingTree,
    DuplicateTree,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainFault {
    pub tree_index: u64,
    #[serde(flatten)]
    pub kind: FaultKind,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChainReport {
    pub trees_checked: usize,
    pub faults: Vec<ChainFault>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Rebuild every tree from its leaf data and check it against its recorded
/// hashes and against the root of the tree before it
pub fn audit_chain(snapshots: &[AuditLogSnapshot]) -> ChainReport {
    let mut ordered: Vec<&AuditLogSnapshot> = snapshots.iter().collect();
    ordered.sort_by_key(|s| s.tree_index);

    let mut report = ChainReport::default();
    let mut previous: Option<&AuditLogSnapshot> = None;

    for snap in ordered {
        let fault = |kind| ChainFault {
            tree_index: snap.tree_index,
            kind,
        };

        if let Some(prev) = previous {
            if prev.tree_index == snap.tree_index {
                report.faults.push(fault(FaultKind::DuplicateTree));
                continue;
            }
            for missing in prev.tree_index + 1..snap.tree_index {
                report.faults.push(ChainFault {
                    tree_index: missing,
                    kind: FaultKind::MissingTree,
                });
            }
            let follows = snap.tree_index == prev.tree_index + 1;
            if follows && snap.first_block() != Some(prev.root_hash.as_str()) {
                report.faults.push(fault(FaultKind::BrokenLink));
            }
        } else if snap.tree_index != 0 {
            for missing in 0..snap.tree_index {
                report.faults.push(ChainFault {
                    tree_index: missing,
                    kind: FaultKind::MissingTree,
                });
            }
        }

        report.trees_checked += 1;
        let blocks = snap.leaf_data_blocks.iter().flatten().cloned();
        match MerkleTree::from_blocks(blocks, DEFAULT_MAX_LEAVES) {
            Ok(tree) => {
                let actual = tree.root_hash();
                if actual != snap.root_hash {
                    report.faults.push(fault(FaultKind::RootMismatch {
                        expected: snap.root_hash.clone(),
                        actual,
                    }));
                }
                let rebuilt = tree.level_hashes();
                let depth = rebuilt.len().max(snap.level_hashes.len());
                let first_diff = (0..depth).find(|&l| rebuilt.get(l) != snap.level_hashes.get(l));
                if let Some(level) = first_diff {
                    report.faults.push(fault(FaultKind::LevelMismatch { level }));
                }
            }
            Err(_) => report.faults.push(fault(FaultKind::LevelMismatch { level: 0 })),
        }

        previous = Some(snap);
    }

    report
}
