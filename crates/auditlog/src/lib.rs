//! Tamper-evident audit log
//!
//! Every recorded payload lands in an incrementally built SHA-256 Merkle tree.
//! A full snapshot of the current tree is persisted after each mutation. Once
//! a tree reaches capacity it is sealed and the next tree starts with the
//! sealed root as its first block, so recomputing forward from the genesis
//! tree reproduces every historical root.

mod audit;
mod crypto;
mod event;
mod history;
mod node;
mod redact;
mod store;
mod tree;
mod types;

pub use audit::{audit_chain, ChainFault, ChainReport, FaultKind};
pub use crypto::{hash_blocks, hash_children, sha256_hex, EMPTY_ROOT};
pub use event::{AuditEvent, EventStatus};
pub use history::RootHistory;
pub use node::{HashNode, NodeArena, NodeId};
pub use redact::{FieldRedactor, NoopRedactor, Redactor, REDACTED};
pub use store::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore, StoreError};
pub use tree::MerkleTree;
pub use types::{
    AuditLogConfig, AuditLogSnapshot, Checkpoint, Hash, Inclusion, RecordReceipt, SealedTree,
    DEFAULT_MAX_LEAVES, MAX_NODE_SIZE,
};

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum AuditError {
    /// Appending to a full leaf or building a node with no children
    #[error("Structural error: {0}")]
    Structural(String),

    /// The snapshot write failed. With `recorded` set the event is in the
    /// in-memory tree and must not be resubmitted; `receipt` then describes
    /// where it landed.
    #[error("Persistence error (event recorded: {recorded}): {source}")]
    Persistence {
        recorded: bool,
        receipt: Option<Box<RecordReceipt>>,
        #[source]
        source: StoreError,
    },

    #[error("Recovery inconsistency in tree {tree_index}: {detail}")]
    RecoveryInconsistency { tree_index: u64, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn snapshot_of(tree: &MerkleTree, tree_index: u64) -> AuditLogSnapshot {
    AuditLogSnapshot {
        root_hash: tree.root_hash(),
        tree_index,
        leaf_data_blocks: tree.leaf_data_blocks(),
        level_hashes: tree.level_hashes(),
        updated_at: unix_now(),
    }
}

/// Owner of the current tree. All mutation goes through `&mut self`, so a
/// shared instance needs one lock around each `record` call.
pub struct AuditLog<S: SnapshotStore> {
    store: S,
    config: AuditLogConfig,
    tree: MerkleTree,
    tree_index: u64,
    history: RootHistory,
    /// Key the current tree's snapshot is stored under, if any write succeeded
    persisted_root: Option<Hash>,
    pending_write: bool,
}

impl<S: SnapshotStore> AuditLog<S> {
    /// Start a new log on an empty store, persisting the empty genesis tree.
    /// A store that already holds snapshots must go through [`AuditLog::recover`].
    pub fn open(store: S, config: AuditLogConfig) -> Result<Self> {
        Self::recover(store, config, std::iter::empty::<String>())
    }

    /// Rebuild the log by replaying journaled payloads in their original
    /// order. Every snapshot already in the store must match a root the replay
    /// produced for the same tree; stale or missing snapshots are rewritten.
    pub fn recover<I, T>(store: S, config: AuditLogConfig, events: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let persisted = store
            .load_all_snapshots()
            .map_err(|source| AuditError::Persistence {
                recorded: false,
                receipt: None,
                source,
            })?;
        let mut by_tree: BTreeMap<u64, Vec<Hash>> = BTreeMap::new();
        for snap in persisted {
            by_tree.entry(snap.tree_index).or_default().push(snap.root_hash);
        }

        let mut log = Self {
            tree: MerkleTree::with_capacity(config.max_leaves_per_tree),
            store,
            config,
            tree_index: 0,
            history: RootHistory::new(),
            persisted_root: None,
            pending_write: false,
        };

        let mut produced: HashSet<Hash> = HashSet::from([log.tree.root_hash()]);
        let mut replayed = 0usize;
        for payload in events {
            if log.tree.is_tree_full() {
                let (sealed, _) = log.seal()?;
                let snapshot = snapshot_of(&sealed, log.tree_index - 1);
                log.reconcile(&mut by_tree, &snapshot, &produced)?;
                produced.clear();
                produced.insert(log.tree.root_hash());
            }
            log.tree.append_data(payload.as_ref())?;
            produced.insert(log.tree.root_hash());
            replayed += 1;
        }

        let current = log.snapshot();
        log.reconcile(&mut by_tree, &current, &produced)?;
        log.persisted_root = Some(current.root_hash);

        if let Some((&tree_index, roots)) = by_tree.iter().next() {
            error!(tree_index, ?roots, "snapshot store holds trees the journal never produced");
            return Err(AuditError::RecoveryInconsistency {
                tree_index,
                detail: format!("{} snapshot(s) beyond the replayed chain", roots.len()),
            });
        }

        log.tree.check_structure()?;
        info!(
            replayed,
            tree_index = log.tree_index,
            root = %log.tree.root_hash(),
            "audit log ready"
        );
        Ok(log)
    }

    /// Compare one replayed tree against what the store holds for its index
    /// and bring the store up to date
    fn reconcile(
        &mut self,
        by_tree: &mut BTreeMap<u64, Vec<Hash>>,
        snapshot: &AuditLogSnapshot,
        produced: &HashSet<Hash>,
    ) -> Result<()> {
        let existing = by_tree.remove(&snapshot.tree_index).unwrap_or_default();
        if let Some(unknown) = existing.iter().find(|root| !produced.contains(*root)) {
            error!(
                tree_index = snapshot.tree_index,
                persisted = %unknown,
                replayed = %snapshot.root_hash,
                "replayed events do not reproduce persisted root"
            );
            return Err(AuditError::RecoveryInconsistency {
                tree_index: snapshot.tree_index,
                detail: format!("persisted root {unknown} was never produced by replay"),
            });
        }

        let write = |store: &mut S, old: Option<&str>| {
            store
                .replace_snapshot(old, snapshot)
                .map_err(|source| AuditError::Persistence {
                    recorded: false,
                    receipt: None,
                    source,
                })
        };

        let stale: Vec<&Hash> = existing
            .iter()
            .filter(|root| **root != snapshot.root_hash)
            .collect();
        if existing.is_empty() {
            write(&mut self.store, None)?;
        }
        for old in stale {
            debug!(tree_index = snapshot.tree_index, old = %old, "replacing stale snapshot");
            write(&mut self.store, Some(old.as_str()))?;
        }
        Ok(())
    }

    /// Append one opaque payload, sealing the current tree first if it is full
    pub fn record(&mut self, payload: &str) -> Result<RecordReceipt> {
        if self.pending_write {
            self.flush().map_err(|e| match e {
                AuditError::Persistence { source, .. } => AuditError::Persistence {
                    recorded: false,
                    receipt: None,
                    source,
                },
                other => other,
            })?;
        }

        let sealed = if self.tree.is_tree_full() {
            let sealed_root = self.persisted_root.clone();
            let (sealed_tree, sealed) = self.seal()?;
            // The chaining leaf is durable before any new event lands on it
            if let Err(source) = self.persist() {
                self.unseal(sealed_tree, sealed_root);
                return Err(AuditError::Persistence {
                    recorded: false,
                    receipt: None,
                    source,
                });
            }
            Some(sealed)
        } else {
            None
        };

        let leaf_index = self.tree.append_data(payload)?;
        let receipt = RecordReceipt {
            root_hash: self.tree.root_hash(),
            tree_index: self.tree_index,
            leaf_index,
            sealed,
        };
        if let Err(source) = self.persist() {
            return Err(AuditError::Persistence {
                recorded: true,
                receipt: Some(Box::new(receipt)),
                source,
            });
        }

        debug!(tree_index = self.tree_index, leaf_index, "event recorded");
        Ok(receipt)
    }

    pub fn record_event(&mut self, event: &AuditEvent) -> Result<RecordReceipt> {
        let payload = event.to_payload()?;
        self.record(&payload)
    }

    /// Swap in a fresh tree whose first block is the old root. Returns the
    /// sealed tree.
    fn seal(&mut self) -> Result<(MerkleTree, SealedTree)> {
        let next = MerkleTree::with_capacity(self.config.max_leaves_per_tree);
        let sealed_tree = std::mem::replace(&mut self.tree, next);
        let root_hash = sealed_tree.root_hash();
        let sealed = SealedTree {
            tree_index: self.tree_index,
            root_hash: root_hash.clone(),
        };

        self.history.record(sealed.clone());
        self.tree_index += 1;
        self.persisted_root = None;
        self.tree.append_data(root_hash.as_str())?;

        info!(
            sealed_index = sealed.tree_index,
            root = %sealed.root_hash,
            leaves = sealed_tree.leaf_count(),
            "tree sealed"
        );
        Ok((sealed_tree, sealed))
    }

    /// Put back a tree whose seal never reached the store. The event that
    /// triggered the seal is refused, so nothing may refer to the next tree.
    fn unseal(&mut self, sealed_tree: MerkleTree, persisted_root: Option<Hash>) {
        warn!(
            tree_index = self.tree_index - 1,
            root = %sealed_tree.root_hash(),
            "chaining snapshot not written; seal undone"
        );
        self.tree = sealed_tree;
        self.tree_index -= 1;
        self.history.pop();
        self.persisted_root = persisted_root;
        // The sealed tree's own snapshot was flushed before sealing
        self.pending_write = false;
    }

    fn persist(&mut self) -> std::result::Result<(), StoreError> {
        let snapshot = self.snapshot();
        match self
            .store
            .replace_snapshot(self.persisted_root.as_deref(), &snapshot)
        {
            Ok(()) => {
                self.persisted_root = Some(snapshot.root_hash);
                self.pending_write = false;
                Ok(())
            }
            Err(e) => {
                self.pending_write = true;
                warn!(
                    tree_index = self.tree_index,
                    root = %snapshot.root_hash,
                    error = %e,
                    "snapshot write failed; in-memory tree is ahead of the store"
                );
                Err(e)
            }
        }
    }

    /// Retry a snapshot write that failed earlier
    pub fn flush(&mut self) -> Result<()> {
        if !self.pending_write {
            return Ok(());
        }
        self.persist().map_err(|source| AuditError::Persistence {
            recorded: true,
            receipt: None,
            source,
        })
    }

    /// Flush and hand back the store
    pub fn close(mut self) -> Result<S> {
        self.flush()?;
        info!(tree_index = self.tree_index, root = %self.tree.root_hash(), "audit log closed");
        Ok(self.store)
    }

    pub fn verify(&self, data: &str) -> bool {
        self.tree.verify_data(data)
    }

    pub fn verify_detailed(&self, data: &str) -> Inclusion {
        self.tree.verify_detailed(data)
    }

    pub fn snapshot(&self) -> AuditLogSnapshot {
        snapshot_of(&self.tree, self.tree_index)
    }

    pub fn root_hash(&self) -> Hash {
        self.tree.root_hash()
    }

    pub fn tree_index(&self) -> u64 {
        self.tree_index
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn config(&self) -> &AuditLogConfig {
        &self.config
    }

    pub fn sealed_roots(&self) -> &RootHistory {
        &self.history
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending_write
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            root_hash: self.tree.root_hash(),
            tree_index: self.tree_index,
            leaf_count: self.tree.leaf_count(),
            block_count: self.tree.block_count(),
            sealed_trees: self.history.len(),
        }
    }

    /// Overwrite a stored block in place, leaving every hash untouched
    #[cfg(any(test, feature = "test-util"))]
    pub fn tamper_block_for_test(&mut self, original: &str, replacement: &str) -> bool {
        self.tree.tamper_block_for_test(original, replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tamper_is_pinpointed() {
        let mut log =
            AuditLog::open(InMemorySnapshotStore::new(), AuditLogConfig::default()).unwrap();
        for i in 0..20 {
            log.record(&format!("e{i}")).unwrap();
        }
        assert!(log.tamper_block_for_test("e5", "e5-forged"));

        assert_eq!(log.verify_detailed("e5-forged"), Inclusion::Mismatch { level: 0 });
        assert!(!log.verify("e5"));
        assert!(log.verify("e17"));
    }
}
