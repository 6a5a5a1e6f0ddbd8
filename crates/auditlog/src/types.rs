//! Core types for the audit log

use serde::{Deserialize, Serialize};

/// Hex-encoded SHA-256 digest
pub type Hash = String;

/// Leaf capacity, in data blocks
pub const MAX_NODE_SIZE: usize = 4;

/// Default number of leaves a tree may hold before it is sealed
pub const DEFAULT_MAX_LEAVES: usize = 4096;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditLogConfig {
    /// A tree seals once it holds this many leaves and the last one is full
    pub max_leaves_per_tree: usize,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            max_leaves_per_tree: DEFAULT_MAX_LEAVES,
        }
    }
}

/// Full persisted state of one tree, replaced on every write
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditLogSnapshot {
    pub root_hash: Hash,
    pub tree_index: u64,
    pub leaf_data_blocks: Vec<Vec<String>>,
    pub level_hashes: Vec<Vec<Hash>>,
    pub updated_at: u64,
}

impl AuditLogSnapshot {
    /// The first block of the first leaf: the previous tree's root for any
    /// tree after the genesis one
    pub fn first_block(&self) -> Option<&str> {
        self.leaf_data_blocks
            .first()
            .and_then(|leaf| leaf.first())
            .map(String::as_str)
    }
}

/// A tree that was closed by rollover
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedTree {
    pub tree_index: u64,
    pub root_hash: Hash,
}

/// Returned by every successful record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub root_hash: Hash,
    pub tree_index: u64,
    pub leaf_index: usize,
    pub sealed: Option<SealedTree>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub root_hash: Hash,
    pub tree_index: u64,
    pub leaf_count: usize,
    pub block_count: usize,
    pub sealed_trees: usize,
}

/// Outcome of an inclusion check
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Inclusion {
    /// Path from the leaf to the root recomputes cleanly
    Verified { leaf_index: usize, path_len: usize },
    /// No leaf holds the block
    NotFound,
    /// First level where a recomputed hash disagrees with the stored one
    Mismatch { level: usize },
}

impl Inclusion {
    pub fn is_verified(&self) -> bool {
        matches!(self, Inclusion::Verified { .. })
    }
}
