use crate::ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid site id: {0}")]
    InvalidSiteId(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Duplicate path in batch: {0}")]
    DuplicatePath(String),

    #[error("File too large: {path} is {size} bytes, limit {limit}")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("Site too large: {size} bytes, limit {limit}")]
    SiteTooLarge { size: u64, limit: u64 },

    #[error("Missing entry point: batch must contain index.html or index.htm")]
    MissingEntryPoint,

    #[error("Forbidden file type: {path} ({reason})")]
    ForbiddenFileType { path: String, reason: String },

    #[error("Upload batch is empty")]
    EmptyBatch,

    #[error("Site already exists: {0}")]
    SiteAlreadyExists(String),

    #[error("Site not found: {0}")]
    SiteNotFound(String),

    #[error("Site expired: {0}")]
    SiteExpired(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Bad input, detected before any write.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VaultError::InvalidSiteId(_)
                | VaultError::InvalidPath(_)
                | VaultError::DuplicatePath(_)
                | VaultError::FileTooLarge { .. }
                | VaultError::SiteTooLarge { .. }
                | VaultError::MissingEntryPoint
                | VaultError::ForbiddenFileType { .. }
                | VaultError::EmptyBatch
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            VaultError::SiteAlreadyExists(_)
                | VaultError::SiteNotFound(_)
                | VaultError::SiteExpired(_)
        )
    }

    /// Mirror failures abort the remainder of a batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VaultError::StorageUnavailable(_) | VaultError::Database(_) | VaultError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
