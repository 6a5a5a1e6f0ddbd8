//! Snapshot store trait and implementations

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::AuditLogSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home for tree snapshots, keyed by root hash
pub trait SnapshotStore: Send + Sync {
    /// Delete the snapshot stored under `old_root` (if any), then insert
    /// `snapshot` under its own root hash
    fn replace_snapshot(
        &mut self,
        old_root: Option<&str>,
        snapshot: &AuditLogSnapshot,
    ) -> Result<(), StoreError>;

    fn load_all_snapshots(&self) -> Result<Vec<AuditLogSnapshot>, StoreError>;
}

/// In-memory store (for testing and demos). Clones share the same map.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    data: Arc<RwLock<HashMap<String, AuditLogSnapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, root_hash: &str) -> Option<AuditLogSnapshot> {
        self.data.read().ok()?.get(root_hash).cloned()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".into())
}

impl SnapshotStore for InMemorySnapshotStore {
    fn replace_snapshot(
        &mut self,
        old_root: Option<&str>,
        snapshot: &AuditLogSnapshot,
    ) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(poisoned)?;
        if let Some(old) = old_root {
            data.remove(old);
        }
        data.insert(snapshot.root_hash.clone(), snapshot.clone());
        Ok(())
    }

    fn load_all_snapshots(&self) -> Result<Vec<AuditLogSnapshot>, StoreError> {
        let data = self.data.read().map_err(poisoned)?;
        let mut all: Vec<AuditLogSnapshot> = data.values().cloned().collect();
        all.sort_by_key(|s| s.tree_index);
        Ok(all)
    }
}

/// All snapshots in one JSON document, rewritten through a temp file and a
/// rename so a crash never leaves a half-written file behind
pub struct FileSnapshotStore {
    path: PathBuf,
    snapshots: HashMap<String, AuditLogSnapshot>,
}

impl FileSnapshotStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshots = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => {
                let list: Vec<AuditLogSnapshot> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|s| (s.root_hash.clone(), s)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, snapshots })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_through(&self, snapshots: &HashMap<String, AuditLogSnapshot>) -> Result<(), StoreError> {
        let mut list: Vec<&AuditLogSnapshot> = snapshots.values().collect();
        list.sort_by_key(|s| s.tree_index);
        let bytes = serde_json::to_vec_pretty(&list)?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn replace_snapshot(
        &mut self,
        old_root: Option<&str>,
        snapshot: &AuditLogSnapshot,
    ) -> Result<(), StoreError> {
        let mut next = self.snapshots.clone();
        if let Some(old) = old_root {
            next.remove(old);
        }
        next.insert(snapshot.root_hash.clone(), snapshot.clone());
        // Memory only moves forward once the file is on disk
        self.write_through(&next)?;
        self.snapshots = next;
        Ok(())
    }

    fn load_all_snapshots(&self) -> Result<Vec<AuditLogSnapshot>, StoreError> {
        let mut all: Vec<AuditLogSnapshot> = self.snapshots.values().cloned().collect();
        all.sort_by_key(|s| s.tree_index);
        Ok(all)
    }
}
