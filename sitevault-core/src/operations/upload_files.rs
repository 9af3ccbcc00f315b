use super::UploadResult;
use super::validate::{SiteBaseline, UploadPolicy, validate_batch};
use crate::site::{SiteFile, SiteState, is_entry_point, normalize_path, validate_site_id};
use crate::store::SiteStore;
use crate::{Result, VaultError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct UploadFilesOperation {
    store: Arc<SiteStore>,
    policy: Arc<UploadPolicy>,
}

#[derive(Debug, Clone)]
pub struct UploadFilesOperationRequest {
    pub site_id: String,
    pub files: Vec<SiteFile>,
}

impl UploadFilesOperation {
    pub fn new(store: Arc<SiteStore>, policy: Arc<UploadPolicy>) -> Self {
        Self { store, policy }
    }

    /// Adds or replaces files of a live site.
    ///
    /// Totals are updated from the previous metadata: each replaced file's old
    /// size is subtracted before its new size is added. Files inherit the
    /// site's expiry.
    pub async fn run(&self, request: UploadFilesOperationRequest) -> Result<UploadResult> {
        let UploadFilesOperationRequest { site_id, files } = request;
        validate_site_id(&site_id)?;

        let current = match self.store.site_state(&site_id).await? {
            SiteState::Live(metadata) => metadata,
            SiteState::Expired(_) => return Err(VaultError::SiteExpired(site_id)),
            SiteState::Absent => return Err(VaultError::SiteNotFound(site_id)),
        };

        let mut existing_sizes = HashMap::new();
        for file in &files {
            let Ok(path) = normalize_path(&file.path) else {
                continue;
            };
            if let Some(entry) = self.store.get_file(&site_id, &path).await? {
                existing_sizes.insert(path, entry.size);
            }
        }

        let baseline = SiteBaseline {
            total_size: current.total_size,
            existing_sizes,
            require_entry_point: false,
        };
        let batch = validate_batch(&self.policy, files, &baseline)?;

        let report = self
            .store
            .store_files_until(&site_id, batch.files, current.expires_at)
            .await;

        let mut result = UploadResult::new(&site_id);
        result.committed = report.committed;
        result.warnings = report.warnings;
        result.fatal = report.fatal;

        if result.committed.is_empty() {
            tracing::error!(upload_id = %result.upload_id, site_id = %site_id, "no files committed");
            return Ok(result);
        }

        let mut metadata = current;
        for file in &result.committed {
            match baseline.existing_sizes.get(&file.path) {
                Some(old_size) => {
                    metadata.total_size = metadata.total_size.saturating_sub(*old_size);
                }
                None => metadata.file_count += 1,
            }
            metadata.total_size += file.size;

            if is_entry_point(&file.path)
                && metadata.entry_point.as_deref().is_none_or(|path| path == file.path)
            {
                metadata.entry_point = Some(file.path.clone());
                metadata.entry_ledger_ref = file.ledger_ref.clone();
            }
        }
        metadata.updated_at = Utc::now();

        match self.store.put_site_metadata(&metadata).await {
            Ok(warning) => {
                result.warnings.extend(warning);
                result.metadata = Some(metadata);
            }
            Err(e) => {
                tracing::error!(site_id = %site_id, error = %e, "failed to update site metadata");
                if result.fatal.is_none() {
                    result.fatal = Some(e);
                }
            }
        }

        tracing::info!(
            upload_id = %result.upload_id,
            site_id = %site_id,
            committed = result.committed.len(),
            warnings = result.warnings.len(),
            ok = result.is_success(),
            "file upload finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::operations::{UploadSiteOperation, UploadSiteOperationRequest};
    use crate::testing::{BrokenMirror, RecordingLedger, TEST_TTL, store_with_ledger, temp_mirror};

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<SiteStore>,
        create: UploadSiteOperation,
        add: UploadFilesOperation,
    }

    fn harness_with(store: SiteStore, dir: tempfile::TempDir, config: UploadConfig) -> Harness {
        let store = Arc::new(store);
        let policy = Arc::new(UploadPolicy::from_config(&config));
        Harness {
            _dir: dir,
            create: UploadSiteOperation::new(store.clone(), policy.clone()),
            add: UploadFilesOperation::new(store.clone(), policy),
            store,
        }
    }

    fn harness(config: UploadConfig) -> Harness {
        let (dir, _mirror, store) = store_with_ledger(Arc::new(RecordingLedger::default()));
        harness_with(store, dir, config)
    }

    async fn create(h: &Harness, site_id: &str, files: Vec<SiteFile>) {
        let result = h
            .create
            .run(UploadSiteOperationRequest {
                site_id: site_id.to_string(),
                files,
            })
            .await
            .unwrap();
        assert!(result.is_success());
    }

    async fn add(h: &Harness, site_id: &str, files: Vec<SiteFile>) -> Result<UploadResult> {
        h.add
            .run(UploadFilesOperationRequest {
                site_id: site_id.to_string(),
                files,
            })
            .await
    }

    #[tokio::test]
    async fn adds_new_files_to_live_site() {
        let h = harness(UploadConfig::default());
        create(&h, "blog", vec![SiteFile::new("index.html", "home")]).await;

        let result = add(&h, "blog", vec![SiteFile::new("posts/one.html", "first")])
            .await
            .unwrap();
        let meta = result.metadata.unwrap();
        assert_eq!(meta.file_count, 2);
        assert_eq!(meta.total_size, 4 + 5);

        let before = h.store.get_file("blog", "index.html").await.unwrap().unwrap();
        let added = h.store.get_file("blog", "posts/one.html").await.unwrap().unwrap();
        assert_eq!(added.expires_at, before.expires_at);
        assert_eq!(added.value.as_ref(), b"first");
    }

    #[tokio::test]
    async fn replacement_adjusts_total_by_delta_only() {
        let h = harness(UploadConfig::default());
        create(
            &h,
            "blog",
            vec![
                SiteFile::new("index.html", "0123456789"),
                SiteFile::new("about.html", "about"),
            ],
        )
        .await;

        // Skew the recorded total so a re-sum would be detectable.
        let mut meta = h.store.get_site_metadata("blog").await.unwrap().unwrap();
        meta.total_size = 1000;
        h.store.put_site_metadata(&meta).await.unwrap();

        let result = add(&h, "blog", vec![SiteFile::new("index.html", "0123456")])
            .await
            .unwrap();
        let meta = result.metadata.unwrap();
        assert_eq!(meta.total_size, 997);
        assert_eq!(meta.file_count, 2);

        let stored = h.store.get_site_metadata("blog").await.unwrap().unwrap();
        assert_eq!(stored.total_size, 997);
        let index = h.store.get_file("blog", "index.html").await.unwrap().unwrap();
        assert_eq!(index.value.as_ref(), b"0123456");
    }

    #[tokio::test]
    async fn repeated_replacement_does_not_double_count() {
        let config = UploadConfig {
            max_file_size: 10,
            max_site_size: 15,
            ..UploadConfig::default()
        };
        let h = harness(config);
        create(&h, "blog", vec![SiteFile::new("index.html", "x".repeat(10))]).await;

        for _ in 0..3 {
            let result = add(&h, "blog", vec![SiteFile::new("index.html", "y".repeat(10))])
                .await
                .unwrap();
            assert_eq!(result.metadata.unwrap().total_size, 10);
        }

        let err = add(&h, "blog", vec![SiteFile::new("more.html", "z".repeat(6))])
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::SiteTooLarge { size: 16, limit: 15 }));
    }

    #[tokio::test]
    async fn missing_or_expired_site_is_a_conflict() {
        let h = harness(UploadConfig::default());
        let err = add(&h, "ghost", vec![SiteFile::new("a.html", "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::SiteNotFound(_)));

        create(&h, "blog", vec![SiteFile::new("index.html", "home")]).await;
        let mut meta = h.store.get_site_metadata("blog").await.unwrap().unwrap();
        meta.expires_at = Utc::now() - chrono::Duration::seconds(1);
        h.store.put_site_metadata(&meta).await.unwrap();

        let err = add(&h, "blog", vec![SiteFile::new("a.html", "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::SiteExpired(_)));
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn entry_point_not_required_when_adding() {
        let h = harness(UploadConfig::default());
        create(&h, "blog", vec![SiteFile::new("index.html", "home")]).await;

        let result = add(&h, "blog", vec![SiteFile::new("style.css", "a{}")])
            .await
            .unwrap();
        assert_eq!(result.metadata.unwrap().entry_point.as_deref(), Some("index.html"));
    }

    #[tokio::test]
    async fn mirror_failure_reports_partial_commit() {
        let (dir, mirror) = temp_mirror();
        let broken = BrokenMirror {
            inner: mirror,
            fail_path: "b.html".to_string(),
        };
        let store = SiteStore::new(
            Arc::new(RecordingLedger::default()),
            Arc::new(broken),
            TEST_TTL,
        );
        let h = harness_with(store, dir, UploadConfig::default());
        create(&h, "blog", vec![SiteFile::new("index.html", "home")]).await;

        let result = add(
            &h,
            "blog",
            vec![
                SiteFile::new("a.html", "aa"),
                SiteFile::new("b.html", "bb"),
                SiteFile::new("c.html", "cc"),
            ],
        )
        .await
        .unwrap();

        assert!(matches!(result.fatal, Some(VaultError::StorageUnavailable(_))));
        let committed: Vec<&str> = result.committed.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(committed, vec!["a.html"]);

        let meta = h.store.get_site_metadata("blog").await.unwrap().unwrap();
        assert_eq!(meta.file_count, 2);
        assert_eq!(meta.total_size, 4 + 2);
        assert!(h.store.get_file("blog", "c.html").await.unwrap().is_none());
    }
}
