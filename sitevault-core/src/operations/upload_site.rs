use super::UploadResult;
use super::validate::{SiteBaseline, UploadPolicy, validate_batch};
use crate::site::{SiteFile, SiteState, validate_site_id};
use crate::store::SiteStore;
use crate::{Result, VaultError};
use std::sync::Arc;

#[derive(Clone)]
pub struct UploadSiteOperation {
    store: Arc<SiteStore>,
    policy: Arc<UploadPolicy>,
}

#[derive(Debug, Clone)]
pub struct UploadSiteOperationRequest {
    pub site_id: String,
    pub files: Vec<SiteFile>,
}

impl UploadSiteOperation {
    pub fn new(store: Arc<SiteStore>, policy: Arc<UploadPolicy>) -> Self {
        Self { store, policy }
    }

    /// Creates a new site. Validation and conflict errors are returned before
    /// anything is written.
    pub async fn run(&self, request: UploadSiteOperationRequest) -> Result<UploadResult> {
        let UploadSiteOperationRequest { site_id, files } = request;
        validate_site_id(&site_id)?;

        if let SiteState::Live(_) = self.store.site_state(&site_id).await? {
            return Err(VaultError::SiteAlreadyExists(site_id));
        }

        let batch = validate_batch(&self.policy, files, &SiteBaseline::new_site())?;
        let files = batch
            .files
            .into_iter()
            .map(|(path, content)| SiteFile { path, content })
            .collect();

        let report = self.store.store_site(&site_id, files).await?;

        let mut result = UploadResult::new(&site_id);
        result.committed = report.committed;
        result.warnings = report.warnings;
        result.metadata = report.metadata;
        result.fatal = report.fatal;

        tracing::info!(
            upload_id = %result.upload_id,
            site_id = %site_id,
            committed = result.committed.len(),
            warnings = result.warnings.len(),
            ok = result.is_success(),
            "site upload finished"
        );

        Ok(result)
    }
}
