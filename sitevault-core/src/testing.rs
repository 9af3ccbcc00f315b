//! Backends used by unit tests across the crate.

use crate::ledger::{DurableRef, LedgerBackend, LedgerError, LedgerWrite};
use crate::storage::{Mirror, SqliteMirror};
use crate::store::SiteStore;
use crate::{Entry, Result, VaultError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub(crate) const TEST_TTL: Duration = Duration::from_secs(3600);

/// Confirms every write with a sequential id and remembers the keys.
#[derive(Default)]
pub(crate) struct RecordingLedger {
    next: AtomicU64,
    keys: Mutex<Vec<String>>,
}

impl RecordingLedger {
    pub(crate) fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerBackend for RecordingLedger {
    async fn submit(&self, write: LedgerWrite) -> std::result::Result<DurableRef, LedgerError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.keys.lock().unwrap().push(write.key);
        Ok(DurableRef::confirmed(format!("0x{:064x}", n), Some(n)))
    }
}

/// Fails every write with the configured error.
pub(crate) struct FailingLedger(pub LedgerError);

impl FailingLedger {
    pub(crate) fn unavailable() -> Self {
        Self(LedgerError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl LedgerBackend for FailingLedger {
    async fn submit(&self, _write: LedgerWrite) -> std::result::Result<DurableRef, LedgerError> {
        Err(self.0.clone())
    }
}

/// Sqlite mirror that refuses writes for one file path.
pub(crate) struct BrokenMirror {
    pub inner: SqliteMirror,
    pub fail_path: String,
}

#[async_trait]
impl Mirror for BrokenMirror {
    async fn write(&self, entry: &Entry) -> Result<()> {
        if entry.path == self.fail_path {
            return Err(VaultError::StorageUnavailable("disk full".to_string()));
        }
        self.inner.write(entry).await
    }

    async fn read(&self, key: &str) -> Result<Option<Entry>> {
        self.inner.read(key).await
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Entry>> {
        self.inner.list_prefix(prefix).await
    }

    async fn extend_expiry(
        &self,
        prefix: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.inner.extend_expiry(prefix, now, expires_at).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.delete_expired(now).await
    }
}

pub(crate) fn temp_mirror() -> (TempDir, SqliteMirror) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mirror = SqliteMirror::open(temp_dir.path().join("mirror.db")).unwrap();
    (temp_dir, mirror)
}

pub(crate) fn store_with_ledger(ledger: Arc<dyn LedgerBackend>) -> (TempDir, SqliteMirror, SiteStore) {
    let (temp_dir, mirror) = temp_mirror();
    let store = SiteStore::new(ledger, Arc::new(mirror.clone()), TEST_TTL);
    (temp_dir, mirror, store)
}
