/// Latest-snapshot store
///
/// Holds zero or one snapshot: the serialized payload exactly as produced by
/// the collection cycle, plus its decoded form for per-section reads. The
/// entry is built outside the lock and swapped in whole, so a reader always
/// gets a complete, self-consistent snapshot.
///
/// The lock is `tokio::sync::RwLock`, which queues readers and writers
/// fairly: a steady stream of readers cannot starve the collection cycle.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::snapshot::{Section, SectionView, Snapshot};

/// One accepted snapshot, shared immutably with every reader
#[derive(Debug)]
pub struct StoredSnapshot {
    payload: Vec<u8>,
    snapshot: Snapshot,
}

impl StoredSnapshot {
    /// Serialized snapshot, byte-for-byte as it was set
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    latest: RwLock<Option<Arc<StoredSnapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot with `payload`
    ///
    /// A payload that does not decode as a snapshot is dropped and the store
    /// keeps its previous value. Returns whether the payload was accepted.
    pub async fn set(&self, payload: &[u8]) -> bool {
        let snapshot: Snapshot = match serde_json::from_slice(payload) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(error = %err, bytes = payload.len(), "rejected snapshot payload");
                return false;
            }
        };

        let entry = Arc::new(StoredSnapshot {
            payload: payload.to_vec(),
            snapshot,
        });

        *self.latest.write().await = Some(entry);
        true
    }

    /// Latest snapshot, or `None` before the first accepted `set`
    pub async fn get(&self) -> Option<Arc<StoredSnapshot>> {
        self.latest.read().await.clone()
    }

    /// One section of the latest snapshot
    ///
    /// Availability is the same for every section: it tracks whether any cycle
    /// completed, not whether this section's provider succeeded.
    pub async fn get_section(&self, section: Section) -> Option<SectionView> {
        self.get()
            .await
            .map(|entry| entry.snapshot().section(section))
    }

    pub async fn has_data(&self) -> bool {
        self.latest.read().await.is_some()
    }
}

/// Shared access to a store that may not exist
///
/// A detached handle behaves like a store that never receives data: writes
/// are ignored and reads report "not present". Callers never need to check
/// whether a store was configured.
#[derive(Debug, Clone, Default)]
pub struct StoreHandle(Option<Arc<SnapshotStore>>);

impl StoreHandle {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self(Some(store))
    }

    pub fn detached() -> Self {
        Self(None)
    }

    pub fn is_attached(&self) -> bool {
        self.0.is_some()
    }

    pub async fn set(&self, payload: &[u8]) -> bool {
        match &self.0 {
            Some(store) => store.set(payload).await,
            None => false,
        }
    }

    pub async fn get(&self) -> Option<Arc<StoredSnapshot>> {
        match &self.0 {
            Some(store) => store.get().await,
            None => None,
        }
    }

    pub async fn get_section(&self, section: Section) -> Option<SectionView> {
        match &self.0 {
            Some(store) => store.get_section(section).await,
            None => None,
        }
    }

    pub async fn has_data(&self) -> bool {
        match &self.0 {
            Some(store) => store.has_data().await,
            None => false,
        }
    }
}

impl From<Arc<SnapshotStore>> for StoreHandle {
    fn from(store: Arc<SnapshotStore>) -> Self {
        Self::new(store)
    }
}
