//! Storage modules for Sitevault
//!
//! The mirror is the authoritative local copy of every accepted entry and the
//! only read path.

pub mod mirror_store;

pub use mirror_store::SqliteMirror;

use crate::{Entry, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable key/value surface holding exact entry bytes and metadata.
///
/// Writes to distinct keys are independent; nothing spans multiple keys.
/// Implementations return the physical record regardless of expiry; the
/// expiry rule is applied by the store.
#[async_trait]
pub trait Mirror: Send + Sync {
    async fn write(&self, entry: &Entry) -> Result<()>;

    async fn read(&self, key: &str) -> Result<Option<Entry>>;

    /// Entries whose key starts with `prefix`, ordered by key.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Entry>>;

    /// Moves `expires_at` of every entry under `prefix` that is still live at
    /// `now`; returns rows touched.
    async fn extend_expiry(
        &self,
        prefix: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Physically removes entries that expired before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}
