pub mod upload_files;
pub mod upload_site;
pub mod validate;

pub use upload_files::{UploadFilesOperation, UploadFilesOperationRequest};
pub use upload_site::{UploadSiteOperation, UploadSiteOperationRequest};
pub use validate::{SiteBaseline, UploadPolicy, ValidatedBatch, validate_batch};

use crate::store::{CommittedFile, LedgerWarning};
use crate::{SiteMetadata, VaultError};

/// Result of an upload that passed validation.
///
/// Either every file committed and `metadata` is set, or `fatal` names the
/// storage failure and `committed` lists the files that made it.
#[derive(Debug)]
pub struct UploadResult {
    pub upload_id: String,
    pub site_id: String,
    pub committed: Vec<CommittedFile>,
    pub warnings: Vec<LedgerWarning>,
    pub metadata: Option<SiteMetadata>,
    pub fatal: Option<VaultError>,
}

impl UploadResult {
    fn new(site_id: &str) -> Self {
        Self {
            upload_id: ulid::Ulid::new().to_string(),
            site_id: site_id.to_string(),
            committed: Vec::new(),
            warnings: Vec::new(),
            metadata: None,
            fatal: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }
}
