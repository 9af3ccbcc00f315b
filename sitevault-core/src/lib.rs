//! Sitevault Core - ledger-backed storage for static sites
//!
//! Uploaded site bundles are written to two places:
//! - an external JSON-RPC ledger, best-effort, for durable content ids
//! - a local SQLite mirror, mandatory, which serves every read
//!
//! Entries carry a bounded lifetime and disappear from reads once expired.

pub mod config;
pub mod error;
pub mod ledger;
pub mod operations;
pub mod site;
pub mod storage;
pub mod store;

pub use config::{ConfirmationPolicy, LedgerConfig, MirrorConfig, UploadConfig};
pub use error::{Result, VaultError};
pub use ledger::{
    Annotation, DisabledLedger, DurableRef, JsonRpcLedgerClient, LedgerBackend, LedgerError,
    LedgerSigner, LedgerWrite,
};
pub use operations::{
    UploadFilesOperation, UploadFilesOperationRequest, UploadPolicy, UploadResult,
    UploadSiteOperation, UploadSiteOperationRequest,
};
pub use site::{
    Entry, SiteFile, SiteMetadata, SiteState, content_type_for_path, domain_label, entry_key,
    is_entry_point, metadata_key, normalize_path, validate_site_id,
};
pub use storage::{Mirror, SqliteMirror};
pub use store::{BatchReport, CommittedFile, LedgerWarning, SiteStore, SiteWriteReport, StoredFile};

#[cfg(test)]
pub(crate) mod testing;
