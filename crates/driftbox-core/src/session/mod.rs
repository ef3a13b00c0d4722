//! Server-side upload session bookkeeping.
//!
//! A session is created the first time a chunk arrives for an upload id and
//! lives until its merge finishes (or a sweep removes it). The registry is
//! the single creation path: [`SessionRegistry::get_or_create`] inserts under
//! the registry lock, so racing first chunks always observe the same record.
//!
//! The ledger kept here is advisory. The merge engine trusts the chunk files
//! on disk; the ledger feeds logging, diagnostics, the per-session merge lock
//! and the stale-session sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One upload attempt as seen by the server.
#[derive(Debug)]
pub struct UploadSession {
    upload_id: String,
    created_at: DateTime<Utc>,
    ledger: Mutex<SessionLedger>,
    merge_lock: tokio::sync::Mutex<()>,
}

#[derive(Debug)]
struct SessionLedger {
    file_name: Option<String>,
    declared_chunks: Option<u64>,
    /// Byte length of the latest write per index
    received: BTreeMap<u64, u64>,
    last_activity: DateTime<Utc>,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Upload session id
    pub upload_id: String,
    /// Target file name from the first chunk
    pub file_name: Option<String>,
    /// Chunk count declared by the client, if sent
    pub declared_chunks: Option<u64>,
    /// Distinct chunk indices stored
    pub received_chunks: usize,
    /// Bytes currently held across all slots
    pub bytes_received: u64,
    /// Whether a merge is running
    pub merging: bool,
    /// When the first chunk arrived
    pub created_at: DateTime<Utc>,
    /// When the last chunk arrived
    pub last_activity: DateTime<Utc>,
}

impl UploadSession {
    fn new(upload_id: String) -> Self {
        let now = Utc::now();
        Self {
            upload_id,
            created_at: now,
            ledger: Mutex::new(SessionLedger {
                file_name: None,
                declared_chunks: None,
                received: BTreeMap::new(),
                last_activity: now,
            }),
            merge_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Upload id of this session.
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn ledger(&self) -> MutexGuard<'_, SessionLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a stored chunk. Re-recording an index replaces its size.
    pub fn record_chunk(&self, file_name: &str, index: u64, bytes: u64, declared: Option<u64>) {
        let mut ledger = self.ledger();
        if ledger.file_name.is_none() {
            ledger.file_name = Some(file_name.to_string());
        } else if ledger.file_name.as_deref() != Some(file_name) {
            tracing::warn!(
                upload_id = %self.upload_id,
                index,
                "Chunk names a different file than the session's first chunk"
            );
        }
        if declared.is_some() {
            ledger.declared_chunks = declared;
        }
        ledger.received.insert(index, bytes);
        ledger.last_activity = Utc::now();
    }

    /// Lowest index in `0..total` that has not been recorded.
    ///
    /// With `n` indices recorded the answer is at most `n`, so the scan never
    /// looks past `n + 1` slots whatever `total` claims.
    pub fn first_missing(&self, total: u64) -> Option<u64> {
        let ledger = self.ledger();
        let bound = total.min(ledger.received.len() as u64 + 1);
        (0..bound).find(|i| !ledger.received.contains_key(i))
    }

    /// Number of distinct indices recorded.
    pub fn received_count(&self) -> usize {
        self.ledger().received.len()
    }

    /// Wait for exclusive merge rights on this session.
    pub async fn lock_merge(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.merge_lock.lock().await
    }

    /// Whether a merge currently holds the lock.
    pub fn is_merging(&self) -> bool {
        self.merge_lock.try_lock().is_err()
    }

    /// Snapshot of the current ledger.
    pub fn snapshot(&self) -> SessionSnapshot {
        let merging = self.is_merging();
        let ledger = self.ledger();
        SessionSnapshot {
            upload_id: self.upload_id.clone(),
            file_name: ledger.file_name.clone(),
            declared_chunks: ledger.declared_chunks,
            received_chunks: ledger.received.len(),
            bytes_received: ledger.received.values().sum(),
            merging,
            created_at: self.created_at,
            last_activity: ledger.last_activity,
        }
    }
}

/// Registry of live upload sessions keyed by upload id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<UploadSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<UploadSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a session, creating it if absent.
    pub fn get_or_create(&self, upload_id: &str) -> Arc<UploadSession> {
        let mut sessions = self.sessions();
        if let Some(existing) = sessions.get(upload_id) {
            return Arc::clone(existing);
        }
        let session = Arc::new(UploadSession::new(upload_id.to_string()));
        sessions.insert(upload_id.to_string(), Arc::clone(&session));
        tracing::debug!(upload_id, "Opened upload session");
        session
    }

    /// Look up a session without creating it.
    pub fn get(&self, upload_id: &str) -> Option<Arc<UploadSession>> {
        self.sessions().get(upload_id).cloned()
    }

    /// Drop a session from the registry.
    ///
    /// Holders of the `Arc` keep a usable record; new lookups start fresh.
    pub fn remove(&self, upload_id: &str) -> Option<Arc<UploadSession>> {
        self.sessions().remove(upload_id)
    }

    /// Whether a session is currently merging.
    pub fn is_busy(&self, upload_id: &str) -> bool {
        self.get(upload_id).is_some_and(|s| s.is_merging())
    }

    /// Snapshots of all live sessions, oldest first.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<_> = self.sessions().values().cloned().collect();
        let mut snapshots: Vec<_> = sessions.iter().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_returns_same_session() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("u1");
        let b = registry.get_or_create("u1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_creation_yields_one_session() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("race"))
            })
            .collect();

        let sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_record_chunk_is_idempotent_per_index() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("u1");

        session.record_chunk("a.bin", 0, 10, Some(3));
        session.record_chunk("a.bin", 2, 4, None);
        session.record_chunk("a.bin", 0, 8, None);

        let snap = session.snapshot();
        assert_eq!(snap.file_name.as_deref(), Some("a.bin"));
        assert_eq!(snap.declared_chunks, Some(3));
        assert_eq!(snap.received_chunks, 2);
        assert_eq!(snap.bytes_received, 12);
        assert_eq!(session.first_missing(3), Some(1));
        assert_eq!(session.first_missing(1), None);
    }

    #[test]
    fn test_first_missing_ignores_declared_total() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("u1");
        assert_eq!(session.first_missing(u64::MAX), Some(0));

        session.record_chunk("a.bin", 0, 1, None);
        session.record_chunk("a.bin", 1, 1, None);
        assert_eq!(session.first_missing(u64::MAX), Some(2));
        assert_eq!(session.first_missing(2), None);
    }

    #[test]
    fn test_remove_starts_fresh() {
        let registry = SessionRegistry::new();
        let first = registry.get_or_create("u1");
        first.record_chunk("a", 0, 1, None);

        registry.remove("u1");
        assert!(registry.is_empty());

        let second = registry.get_or_create("u1");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.received_count(), 0);
    }

    #[tokio::test]
    async fn test_merge_lock_marks_busy() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("u1");

        assert!(!registry.is_busy("u1"));
        let guard = session.lock_merge().await;
        assert!(registry.is_busy("u1"));
        assert!(session.snapshot().merging);
        drop(guard);
        assert!(!registry.is_busy("u1"));
    }
}
