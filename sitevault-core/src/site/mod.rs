//! Site data model
//!
//! Entries are the unit of storage in the mirror; a site is a set of file
//! entries plus one metadata entry, all sharing the site's key prefix.

pub mod content_type;
pub mod keys;
pub mod path;

pub use content_type::content_type_for_path;
pub use keys::{domain_label, entry_key, metadata_key, site_prefix, validate_site_id};
pub use path::{is_entry_point, normalize_path, ENTRY_POINTS};

use crate::ledger::DurableRef;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Path recorded on the metadata entry of a site.
pub const METADATA_PATH: &str = "";

pub const METADATA_CONTENT_TYPE: &str = "application/json";

/// A stored key/value record as held by the mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub site_id: String,
    pub path: String,
    pub value: Bytes,
    pub content_type: String,
    pub size: u64,
    pub expires_at: DateTime<Utc>,
    pub ledger_ref: Option<DurableRef>,
    pub written_at: DateTime<Utc>,
}

impl Entry {
    pub fn new_file(
        site_id: &str,
        path: &str,
        value: Bytes,
        expires_at: DateTime<Utc>,
        ledger_ref: Option<DurableRef>,
    ) -> Self {
        Self {
            key: entry_key(site_id, path),
            site_id: site_id.to_string(),
            path: path.to_string(),
            size: value.len() as u64,
            content_type: content_type_for_path(path).to_string(),
            value,
            expires_at,
            ledger_ref,
            written_at: Utc::now(),
        }
    }

    pub fn is_metadata(&self) -> bool {
        self.key == metadata_key(&self.site_id)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// A file belongs to the current incarnation of a site only if it is
    /// unexpired and was written no earlier than the site was created.
    /// Rows left by an aborted or earlier creation stay hidden.
    pub fn is_visible_in(&self, site: &SiteMetadata, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && self.written_at >= site.created_at
    }
}

/// An incoming file before validation.
#[derive(Debug, Clone)]
pub struct SiteFile {
    pub path: String,
    pub content: Bytes,
}

impl SiteFile {
    pub fn new(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMetadata {
    pub site_id: String,
    pub domain_label: String,
    pub total_size: u64,
    pub file_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Ledger reference of the entry-point file, kept for backlinks.
    #[serde(default)]
    pub entry_ledger_ref: Option<DurableRef>,
}

impl SiteMetadata {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn to_entry(&self, ledger_ref: Option<DurableRef>) -> crate::Result<Entry> {
        let value = Bytes::from(serde_json::to_vec(self)?);
        Ok(Entry {
            key: metadata_key(&self.site_id),
            site_id: self.site_id.clone(),
            path: METADATA_PATH.to_string(),
            size: value.len() as u64,
            content_type: METADATA_CONTENT_TYPE.to_string(),
            value,
            expires_at: self.expires_at,
            ledger_ref,
            written_at: Utc::now(),
        })
    }

    pub fn from_entry(entry: &Entry) -> crate::Result<Self> {
        Ok(serde_json::from_slice(&entry.value)?)
    }
}

/// Visibility of a site as seen by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteState {
    Absent,
    Expired(SiteMetadata),
    Live(SiteMetadata),
}

impl SiteState {
    pub fn live(self) -> Option<SiteMetadata> {
        match self {
            SiteState::Live(meta) => Some(meta),
            _ => None,
        }
    }
}
