use crate::ledger::{Annotation, DurableRef, LedgerBackend, LedgerError, LedgerWrite};
use crate::site::{
    ENTRY_POINTS, Entry, SiteFile, SiteMetadata, SiteState, domain_label, entry_key,
    is_entry_point, metadata_key, normalize_path, site_prefix, validate_site_id,
};
use crate::storage::Mirror;
use crate::{Result, VaultError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// A ledger failure recorded against one entry. Never fails the batch.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerWarning {
    pub key: String,
    pub path: String,
    pub message: String,
    #[serde(skip)]
    pub error: LedgerError,
}

impl LedgerWarning {
    fn new(entry_key: &str, path: &str, error: LedgerError) -> Self {
        Self {
            key: entry_key.to_string(),
            path: path.to_string(),
            message: error.to_string(),
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommittedFile {
    pub path: String,
    pub size: u64,
    pub content_type: String,
    pub ledger_ref: Option<DurableRef>,
}

impl From<&Entry> for CommittedFile {
    fn from(entry: &Entry) -> Self {
        Self {
            path: entry.path.clone(),
            size: entry.size,
            content_type: entry.content_type.clone(),
            ledger_ref: entry.ledger_ref.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub entry: Entry,
    pub warning: Option<LedgerWarning>,
}

/// Outcome of writing a batch of files.
///
/// `committed` lists exactly the files whose mirror write succeeded, in batch
/// order. When `fatal` is set, the files after the failing one were not
/// written to the mirror.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub committed: Vec<CommittedFile>,
    pub warnings: Vec<LedgerWarning>,
    pub fatal: Option<VaultError>,
}

#[derive(Debug)]
pub struct SiteWriteReport {
    pub site_id: String,
    pub committed: Vec<CommittedFile>,
    pub warnings: Vec<LedgerWarning>,
    /// Set once metadata is written and the site is visible.
    pub metadata: Option<SiteMetadata>,
    pub fatal: Option<VaultError>,
}

impl SiteWriteReport {
    pub fn is_complete(&self) -> bool {
        self.fatal.is_none() && self.metadata.is_some()
    }
}

/// Persistent site store.
///
/// Every write tries the ledger first and then writes the mirror. The ledger
/// outcome is only recorded; the mirror write is what makes an entry exist.
/// Reads go to the mirror only.
pub struct SiteStore {
    ledger: Arc<dyn LedgerBackend>,
    mirror: Arc<dyn Mirror>,
    ttl: chrono::Duration,
    ledger_ttl: Duration,
    ledger_concurrency: usize,
}

impl SiteStore {
    pub fn new(ledger: Arc<dyn LedgerBackend>, mirror: Arc<dyn Mirror>, ttl: Duration) -> Self {
        let chrono_ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            ledger,
            mirror,
            ttl: chrono_ttl,
            ledger_ttl: ttl,
            ledger_concurrency: 4,
        }
    }

    pub fn with_ledger_concurrency(mut self, concurrency: usize) -> Self {
        self.ledger_concurrency = concurrency.max(1);
        self
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Stores one file under `site_id`. A live site lends its expiry to the
    /// file; otherwise the file gets a fresh TTL.
    pub async fn store_file(&self, site_id: &str, file: &SiteFile) -> Result<StoredFile> {
        validate_site_id(site_id)?;
        let path = normalize_path(&file.path)?;

        let now = Utc::now();
        let expires_at = match self.site_state(site_id).await? {
            SiteState::Live(meta) => meta.expires_at,
            _ => now + self.ttl,
        };

        let (ledger_ref, warning) = self
            .ledger_phase(site_id, &path, &file.content, expires_at, now)
            .await;
        let entry = Entry::new_file(site_id, &path, file.content.clone(), expires_at, ledger_ref);
        self.mirror_phase(&entry).await?;

        tracing::debug!(site_id, path = %path, size = entry.size, "stored file");
        Ok(StoredFile { entry, warning })
    }

    /// Creates a site from a batch of files. Fails with `SiteAlreadyExists`
    /// if the site is live.
    pub async fn store_site(&self, site_id: &str, files: Vec<SiteFile>) -> Result<SiteWriteReport> {
        validate_site_id(site_id)?;
        let files = normalize_batch(files)?;

        if let SiteState::Live(_) = self.site_state(site_id).await? {
            return Err(VaultError::SiteAlreadyExists(site_id.to_string()));
        }

        let now = Utc::now();
        let expires_at = now + self.ttl;
        let batch = self.store_files_until(site_id, files, expires_at).await;

        let mut report = SiteWriteReport {
            site_id: site_id.to_string(),
            committed: batch.committed,
            warnings: batch.warnings,
            metadata: None,
            fatal: batch.fatal,
        };

        if report.fatal.is_some() {
            tracing::error!(
                site_id,
                committed = report.committed.len(),
                "site creation aborted, metadata not written"
            );
            return Ok(report);
        }

        // Best-effort race detection: a concurrent creator may have won
        // while our files were being written.
        match self.site_state(site_id).await {
            Ok(SiteState::Live(_)) => {
                tracing::warn!(site_id, "lost site creation race");
                report.fatal = Some(VaultError::SiteAlreadyExists(site_id.to_string()));
                return Ok(report);
            }
            Ok(_) => {}
            Err(e) => {
                report.fatal = Some(e);
                return Ok(report);
            }
        }

        let entry_point = ENTRY_POINTS
            .iter()
            .find_map(|name| report.committed.iter().find(|file| file.path == *name));

        let metadata = SiteMetadata {
            site_id: site_id.to_string(),
            domain_label: domain_label(site_id),
            total_size: report.committed.iter().map(|file| file.size).sum(),
            file_count: report.committed.len() as u64,
            created_at: now,
            updated_at: now,
            expires_at,
            entry_point: entry_point.map(|file| file.path.clone()),
            entry_ledger_ref: entry_point.and_then(|file| file.ledger_ref.clone()),
        };

        match self.put_site_metadata(&metadata).await {
            Ok(warning) => {
                report.warnings.extend(warning);
                report.metadata = Some(metadata);
                tracing::info!(
                    site_id,
                    files = report.committed.len(),
                    warnings = report.warnings.len(),
                    "site created"
                );
            }
            Err(e) => report.fatal = Some(e),
        }

        Ok(report)
    }

    /// Writes already-normalized files that all expire at `expires_at`.
    ///
    /// Ledger submissions run concurrently; mirror writes then go in batch
    /// order and stop at the first failure.
    pub async fn store_files_until(
        &self,
        site_id: &str,
        files: Vec<(String, Bytes)>,
        expires_at: DateTime<Utc>,
    ) -> BatchReport {
        let now = Utc::now();

        let mut ledger_results: Vec<(usize, Option<DurableRef>, Option<LedgerWarning>)> =
            stream::iter(files.iter().enumerate())
                .map(|(index, (path, content))| async move {
                    let (ledger_ref, warning) = self
                        .ledger_phase(site_id, path, content, expires_at, now)
                        .await;
                    (index, ledger_ref, warning)
                })
                .buffer_unordered(self.ledger_concurrency)
                .boxed()
                .collect()
                .await;
        ledger_results.sort_by_key(|(index, _, _)| *index);

        let mut report = BatchReport::default();
        for ((path, content), (_, ledger_ref, warning)) in files.into_iter().zip(ledger_results) {
            let entry = Entry::new_file(site_id, &path, content, expires_at, ledger_ref);

            if let Err(e) = self.mirror_phase(&entry).await {
                tracing::error!(site_id, path = %path, error = %e, "mirror write failed, aborting batch");
                report.fatal = Some(e);
                break;
            }

            report.warnings.extend(warning);
            report.committed.push(CommittedFile::from(&entry));
        }

        report
    }

    /// Writes site metadata to the ledger (best-effort) and the mirror.
    pub async fn put_site_metadata(&self, metadata: &SiteMetadata) -> Result<Option<LedgerWarning>> {
        let key = metadata_key(&metadata.site_id);
        let value = Bytes::from(serde_json::to_vec(metadata)?);
        let write = LedgerWrite {
            key: key.clone(),
            value,
            annotations: vec![
                Annotation::string("site", metadata.site_id.clone()),
                Annotation::string("kind", "metadata"),
                Annotation::numeric("file_count", metadata.file_count),
                Annotation::numeric("total_size", metadata.total_size),
            ],
            ttl: self.remaining_ttl(metadata.expires_at, Utc::now()),
        };

        let (ledger_ref, warning) = self.attempt_ledger(write, "").await;
        let entry = metadata.to_entry(ledger_ref)?;
        self.mirror_phase(&entry).await?;
        Ok(warning)
    }

    pub async fn get_site_metadata(&self, site_id: &str) -> Result<Option<SiteMetadata>> {
        if validate_site_id(site_id).is_err() {
            return Ok(None);
        }
        Ok(self.site_state(site_id).await?.live())
    }

    pub async fn site_state(&self, site_id: &str) -> Result<SiteState> {
        let Some(entry) = self.read_entry(&metadata_key(site_id)).await? else {
            return Ok(SiteState::Absent);
        };

        let metadata = SiteMetadata::from_entry(&entry)?;
        if entry.is_expired_at(Utc::now()) || metadata.is_expired_at(Utc::now()) {
            return Ok(SiteState::Expired(metadata));
        }

        Ok(SiteState::Live(metadata))
    }

    /// Reads a file of a live site. Expired entries, entries written before
    /// the site was created and files of sites without live metadata are
    /// absent.
    pub async fn get_file(&self, site_id: &str, path: &str) -> Result<Option<Entry>> {
        let Ok(path) = normalize_path(path) else {
            return Ok(None);
        };

        let Some(site) = self.get_site_metadata(site_id).await? else {
            return Ok(None);
        };

        self.read_live_file(&site, &path).await
    }

    /// Maps a request path to a stored file, serving entry points for the
    /// site root and for directory-like paths.
    pub async fn resolve_file(&self, site_id: &str, request_path: &str) -> Result<Option<Entry>> {
        let Some(site) = self.get_site_metadata(site_id).await? else {
            return Ok(None);
        };

        let trimmed = request_path.trim_start_matches('/');
        let mut candidates = Vec::new();
        if trimmed.is_empty() || trimmed.ends_with('/') {
            for name in ENTRY_POINTS {
                candidates.push(format!("{}{}", trimmed, name));
            }
        } else {
            candidates.push(trimmed.to_string());
            for name in ENTRY_POINTS {
                candidates.push(format!("{}/{}", trimmed, name));
            }
        }

        for candidate in candidates {
            let Ok(path) = normalize_path(&candidate) else {
                continue;
            };
            if let Some(entry) = self.read_live_file(&site, &path).await? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Live file entries of a live site, ordered by path.
    pub async fn list_site_files(&self, site_id: &str) -> Result<Vec<Entry>> {
        let Some(site) = self.get_site_metadata(site_id).await? else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let entries = self
            .mirror
            .list_prefix(&site_prefix(site_id))
            .await
            .map_err(storage_err)?;

        let mut files: Vec<Entry> = entries
            .into_iter()
            .filter(|entry| !entry.is_metadata() && entry.is_visible_in(&site, now))
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Pushes the expiry of a live site and its live files forward.
    /// Ledger copies keep the lifetime they were written with.
    pub async fn extend_site(&self, site_id: &str, extra: Duration) -> Result<SiteMetadata> {
        validate_site_id(site_id)?;
        let mut metadata = match self.site_state(site_id).await? {
            SiteState::Live(metadata) => metadata,
            SiteState::Expired(_) => return Err(VaultError::SiteExpired(site_id.to_string())),
            SiteState::Absent => return Err(VaultError::SiteNotFound(site_id.to_string())),
        };

        let extra = chrono::Duration::from_std(extra)
            .map_err(|e| VaultError::Internal(format!("extension out of range: {}", e)))?;
        let now = Utc::now();
        metadata.expires_at += extra;
        metadata.updated_at = now;

        let touched = self
            .mirror
            .extend_expiry(&site_prefix(site_id), now, metadata.expires_at)
            .await
            .map_err(storage_err)?;
        self.put_site_metadata(&metadata).await?;

        tracing::info!(site_id, touched, expires_at = %metadata.expires_at, "site lifetime extended");
        Ok(metadata)
    }

    /// Physically removes expired entries. Reads do not depend on this.
    pub async fn reclaim_expired(&self) -> Result<usize> {
        let removed = self
            .mirror
            .delete_expired(Utc::now())
            .await
            .map_err(storage_err)?;
        if removed > 0 {
            tracing::info!(removed, "reclaimed expired entries");
        }
        Ok(removed)
    }

    async fn read_live_file(&self, site: &SiteMetadata, path: &str) -> Result<Option<Entry>> {
        let entry = self.read_entry(&entry_key(&site.site_id, path)).await?;
        Ok(entry.filter(|entry| entry.is_visible_in(site, Utc::now())))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<Entry>> {
        self.mirror.read(key).await.map_err(storage_err)
    }

    /// Phase A: best-effort ledger write for a file.
    async fn ledger_phase(
        &self,
        site_id: &str,
        path: &str,
        content: &Bytes,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (Option<DurableRef>, Option<LedgerWarning>) {
        let write = LedgerWrite {
            key: entry_key(site_id, path),
            value: content.clone(),
            annotations: vec![
                Annotation::string("site", site_id),
                Annotation::string("path", path),
                Annotation::string("content_type", crate::content_type_for_path(path)),
                Annotation::numeric("size", content.len() as u64),
                Annotation::numeric("entry_point", is_entry_point(path) as u64),
            ],
            ttl: self.remaining_ttl(expires_at, now),
        };

        self.attempt_ledger(write, path).await
    }

    async fn attempt_ledger(
        &self,
        write: LedgerWrite,
        path: &str,
    ) -> (Option<DurableRef>, Option<LedgerWarning>) {
        let key = write.key.clone();
        match self.ledger.submit(write).await {
            Ok(ledger_ref) => (Some(ledger_ref), None),
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "ledger write failed, keeping entry local-only");
                (error.provisional_ref(), Some(LedgerWarning::new(&key, path, error)))
            }
        }
    }

    /// Phase B: the mandatory mirror write.
    async fn mirror_phase(&self, entry: &Entry) -> Result<()> {
        self.mirror.write(entry).await.map_err(storage_err)
    }

    fn remaining_ttl(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        (expires_at - now).to_std().unwrap_or(self.ledger_ttl)
    }
}

/// Normalizes every path of a batch, rejecting empty batches and duplicates.
pub fn normalize_batch(files: Vec<SiteFile>) -> Result<Vec<(String, Bytes)>> {
    if files.is_empty() {
        return Err(VaultError::EmptyBatch);
    }

    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(files.len());
    for file in files {
        let path = normalize_path(&file.path)?;
        if !seen.insert(path.clone()) {
            return Err(VaultError::DuplicatePath(path));
        }
        normalized.push((path, file.content));
    }

    Ok(normalized)
}

fn storage_err(error: VaultError) -> VaultError {
    match error {
        VaultError::StorageUnavailable(_) => error,
        other => VaultError::StorageUnavailable(other.to_string()),
    }
}
